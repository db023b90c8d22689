pub mod locstr;

// Reexporting the format types for easier access
pub use locstr::{LocStrDirectory, LocStrFile, LocStrWriteBack};
