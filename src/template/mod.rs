//! SIRI template system.
//!
//! This module provides:
//! - A read-only template store confined to a root directory
//! - The renderer turning template text into XML (`dateTime`, `addTime`)
//! - Routing hint extraction (`<!-- path: ... -->`)
//!
//! # Example
//!
//! ```ignore
//! let store = TemplateStore::open("templates/siri/request")?;
//!
//! for name in store.list() {
//!     println!("{}", name?);
//! }
//!
//! let template = store.get("siri/et.xml")?;
//! let ctx = RenderContext::new(Utc::now(), "client");
//! let xml = render(&template.content, &ctx)?;
//! let path = extract_routing_hint(&template.content);
//! ```

mod duration;
mod render;
mod routing;
mod store;
mod types;

pub use duration::parse_duration;
pub use render::render;
pub use routing::{extract_routing_hint, join_url};
pub use store::{open_optional, TemplateNames, TemplateStore};
pub use types::{RenderContext, Template, TemplateError, TemplateResult};
