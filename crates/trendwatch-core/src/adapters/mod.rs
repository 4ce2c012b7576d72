//! Upstream adapters implementing [`crate::upstream::TrendsSource`].

mod google;

pub use google::GoogleTrendsAdapter;
