pub mod core;
pub mod i18n;
