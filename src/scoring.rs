use crate::config::CrawlerConfig;
use crate::model::PriceLevel;

/// Composite ranking of a place from its rating, distance to the search
/// center and price desirability. Pure; all knobs come from the config
/// record at construction.
#[derive(Debug, Clone)]
pub struct Scorer {
    rating_weight: f64,
    distance_weight: f64,
    price_weight: f64,
    max_useful_distance_km: f64,
    desirability_low: f64,
    desirability_mid: f64,
    desirability_high: f64,
}

const NEUTRAL: f64 = 0.5;

impl Scorer {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            rating_weight: config.rating_weight,
            distance_weight: config.distance_weight,
            price_weight: config.price_weight,
            max_useful_distance_km: config.max_useful_distance_km,
            desirability_low: config.price_desirability_low,
            desirability_mid: config.price_desirability_mid,
            desirability_high: config.price_desirability_high,
        }
    }

    /// Weighted sum of the three normalized components. Monotonic in
    /// each input with the others held fixed: higher rating, shorter
    /// distance and more desirable price never lower the result.
    pub fn score(&self, rating: Option<f64>, distance_km: f64, price: PriceLevel) -> f64 {
        self.rating_weight * self.rating_component(rating)
            + self.distance_weight * self.distance_component(distance_km)
            + self.price_weight * self.price_desirability(price)
    }

    fn rating_component(&self, rating: Option<f64>) -> f64 {
        match rating {
            Some(value) => (value / 5.0).clamp(0.0, 1.0),
            None => NEUTRAL,
        }
    }

    fn distance_component(&self, distance_km: f64) -> f64 {
        let distance = distance_km.max(0.0);
        1.0 - (distance / self.max_useful_distance_km).min(1.0)
    }

    pub fn price_desirability(&self, price: PriceLevel) -> f64 {
        match price {
            PriceLevel::Unknown => NEUTRAL,
            PriceLevel::Low => self.desirability_low,
            PriceLevel::Mid => self.desirability_mid,
            PriceLevel::High => self.desirability_high,
        }
    }
}
