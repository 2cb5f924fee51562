// Client-side support for the embeddable widget and dashboard preview:
// the token-stream wire protocol and the lead-collection flow.

pub mod collect;
pub mod stream;
