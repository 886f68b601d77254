/// Coarse geographic bucket used for early regional comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Area {
    Hubei,
    Us,
    ChinaExcludingHubei,
    RestOfWorld,
}

impl Area {
    pub fn label(&self) -> &'static str {
        match self {
            Area::Hubei => "Hubei",
            Area::Us => "US",
            Area::ChinaExcludingHubei => "China (exclude Hubei)",
            Area::RestOfWorld => "Rest of World",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rows count toward `days_since_confirmed` once confirmed > this value.
    pub confirmed_threshold: i64,
    /// Rows count toward `days_since_deaths` once deaths > this value.
    pub deaths_threshold: i64,
    /// Countries with population at or below this are left out of
    /// per-million tables.
    pub min_population: u64,
    pub top_n: usize,
    pub watch_list: Vec<String>,
    /// Unmatched countries at or below this latest confirmed volume are
    /// accepted by the reconciliation closure check.
    pub negligible_confirmed: i64,
    pub doubling_periods: Vec<u32>,
}

pub const DEFAULT_WATCH_LIST: [&str; 8] = [
    "Mainland China",
    "South Korea",
    "Italy",
    "Spain",
    "Germany",
    "France",
    "UK",
    "US",
];

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confirmed_threshold: 100,
            deaths_threshold: 10,
            min_population: 1_000_000,
            top_n: 10,
            watch_list: DEFAULT_WATCH_LIST.iter().map(|c| c.to_string()).collect(),
            negligible_confirmed: 1_000,
            doubling_periods: vec![1, 2, 3, 7],
        }
    }
}
