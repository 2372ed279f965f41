pub mod cleaner;
pub mod fetcher;
pub mod sources;

pub use cleaner::HtmdCleaner;
pub use fetcher::ReqwestFetcher;
pub use sources::{
    ClassifiedsScraper, ClassifiedsSite, MarketplaceScraper, MarketplaceSite, PublicRecordsScraper,
    PublicRecordsSite, ScraperConfig, SiteScraper,
};
