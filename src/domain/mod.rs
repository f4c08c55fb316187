pub mod change;

pub use change::{first_line, Change, ChangeKind, Metadata};
