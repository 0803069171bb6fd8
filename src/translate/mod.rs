mod translator;
mod types;

pub use translator::FilenameTranslator;
pub use types::{TranslateError, Translation};
