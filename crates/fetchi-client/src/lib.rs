#[cfg(feature = "browser")]
pub mod browser;
pub mod converter;
pub mod fetcher;

#[cfg(feature = "browser")]
pub use browser::{ChromiumInstance, ChromiumLauncher, RenderedFetcher};
pub use converter::HtmdConverter;
pub use fetcher::StaticFetcher;
