//! Template store, renderer and routing working together on a real
//! directory tree

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use siri_client::client::SiriClient;
use siri_client::template::{
    extract_routing_hint, open_optional, render, RenderContext, TemplateError, TemplateStore,
};

const ESTIMATED_TIMETABLE: &str = r#"<!-- path: /siri/et.xml -->
<Siri xmlns="http://www.siri.org.uk/siri" version="2.0">
  <ServiceRequest>
    <RequestTimestamp>{{ dateTime .Now }}</RequestTimestamp>
    <RequestorRef>{{ .ClientRef }}</RequestorRef>
    <EstimatedTimetableRequest version="2.0">
      <RequestTimestamp>{{ dateTime .Now }}</RequestTimestamp>
      <PreviewInterval>{{ "PT1H" }}</PreviewInterval>
    </EstimatedTimetableRequest>
  </ServiceRequest>
</Siri>
"#;

const SUBSCRIPTION: &str = r#"<Siri>
  <SubscriptionRequest>
    <RequestTimestamp>{{ dateTime .Now }}</RequestTimestamp>
    <InitialTerminationTime>{{ dateTime (addTime .Now "24h") }}</InitialTerminationTime>
  </SubscriptionRequest>
</Siri>"#;

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn request_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "siri/et.xml", ESTIMATED_TIMETABLE);
    write(dir.path(), "siri/subscription/et.xml", SUBSCRIPTION);
    write(dir.path(), "vdv453/a/b/c/d/deep.xml", "<deep>{{ .ClientRef }}</deep>");
    write(dir.path(), "readme.txt", "plain text, no actions");
    fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
    dir
}

fn ctx() -> RenderContext {
    RenderContext::new(Utc.with_ymd_and_hms(2024, 3, 10, 8, 15, 0).unwrap(), "NINKASI")
}

#[test]
fn test_listing_whole_tree_skips_non_xml() {
    let dir = request_tree();
    let store = assert_ok!(TemplateStore::open(dir.path()));

    assert_eq!(
        store.names().unwrap(),
        vec![
            "siri/et.xml",
            "siri/subscription/et.xml",
            "vdv453/a/b/c/d/deep.xml",
        ]
    );
}

#[test]
fn test_every_listed_name_loads_and_renders() {
    let dir = request_tree();
    let store = TemplateStore::open(dir.path()).unwrap();

    for name in store.list() {
        let name = name.unwrap();
        let template = assert_ok!(store.get(&name));
        assert_eq!(template.name, name);
        assert_ok!(render(&template.content, &ctx()));
    }

    // Readable by name even though it is not listed
    assert_eq!(store.get("readme.txt").unwrap().content, "plain text, no actions");
}

#[test]
fn test_render_stored_request() {
    let dir = request_tree();
    let store = TemplateStore::open(dir.path()).unwrap();

    let template = store.get("siri/subscription/et.xml").unwrap();
    let xml = render(&template.content, &ctx()).unwrap();
    assert_eq!(
        xml,
        "<Siri>
  <SubscriptionRequest>
    <RequestTimestamp>2024-03-10T08:15:00Z</RequestTimestamp>
    <InitialTerminationTime>2024-03-11T08:15:00Z</InitialTerminationTime>
  </SubscriptionRequest>
</Siri>"
    );

    let deep = store.get("vdv453/a/b/c/d/deep.xml").unwrap();
    assert_eq!(render(&deep.content, &ctx()).unwrap(), "<deep>NINKASI</deep>");
}

#[test]
fn test_routing_hint_from_stored_template() {
    let dir = request_tree();
    let store = TemplateStore::open(dir.path()).unwrap();

    let template = store.get("siri/et.xml").unwrap();
    assert_eq!(
        extract_routing_hint(&template.content).as_deref(),
        Some("/siri/et.xml")
    );
    assert_eq!(extract_routing_hint(&store.get("siri/subscription/et.xml").unwrap().content), None);

    let (client, _mailbox) = SiriClient::builder("NINKASI", "http://siri.example:8080/", "127.0.0.1:0")
        .build()
        .unwrap();
    assert_eq!(
        client.target_for(&template.content),
        "http://siri.example:8080/siri/et.xml"
    );
}

#[test]
fn test_rendered_output_keeps_routing_comment() {
    let xml = render(ESTIMATED_TIMETABLE, &ctx()).unwrap();
    assert!(xml.starts_with("<!-- path: /siri/et.xml -->\n"));
    assert!(xml.contains("<RequestorRef>NINKASI</RequestorRef>"));
    assert!(xml.contains("<PreviewInterval>PT1H</PreviewInterval>"));
}

#[test]
fn test_escapes_are_refused() {
    let outer = TempDir::new().unwrap();
    write(outer.path(), "secret.xml", "<secret/>");
    write(outer.path(), "templates/ok.xml", "<ok/>");
    let store = TemplateStore::open(outer.path().join("templates")).unwrap();

    assert_eq!(store.get("ok.xml").unwrap().content, "<ok/>");
    for name in ["../secret.xml", "a/../../secret.xml", "./../secret.xml"] {
        let err = assert_err!(store.get(name));
        assert!(matches!(err, TemplateError::PathEscape(_)), "{name}: {err:?}");
    }
}

#[test]
fn test_directories_are_not_templates() {
    let dir = request_tree();
    let store = TemplateStore::open(dir.path()).unwrap();

    for name in ["siri", "empty/nested", ""] {
        assert!(
            matches!(store.get(name), Err(TemplateError::NotFound(_))),
            "{name}"
        );
    }
}

#[test]
fn test_optional_root() {
    let dir = request_tree();
    assert!(open_optional(dir.path().join("siri")).is_some());
    assert!(open_optional(dir.path().join("missing")).is_none());
    assert!(open_optional(dir.path().join("readme.txt")).is_none());
}
