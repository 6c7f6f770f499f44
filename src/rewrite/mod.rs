//! Hyperlink rewriting for replayed pages
//!
//! After a replayed page loads, same-origin links that escaped the replay
//! namespace are rebased onto the page's own `/replay/<timestamp>/<origin>`
//! prefix, so following them stays inside the same capture.

mod html;
mod links;

pub use html::HtmlDocument;
pub use links::{AnchorSet, LinkRewriter};
