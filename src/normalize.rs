use std::collections::HashMap;

use tracing::warn;

use crate::errors::{CrawlError, CrawlResult};
use crate::geo::{haversine_km, GeoPoint};
use crate::model::{place_id, Place, PriceLevel, RawRecord};
use crate::scoring::Scorer;

const CURRENCY_GLYPHS: [char; 4] = ['$', '€', '£', '₹'];

/// Turn one raw scraped record into a validated, scored [`Place`].
///
/// Missing or malformed rating and price text degrade to absent values;
/// a record without a usable name or coordinates is rejected.
pub fn normalize(raw: &RawRecord, center: GeoPoint, scorer: &Scorer) -> CrawlResult<Place> {
    let name = raw
        .name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CrawlError::Parse("record has no name".into()))?;

    let coordinates = raw
        .url
        .as_deref()
        .and_then(coordinates_from_url)
        .ok_or_else(|| CrawlError::Parse(format!("record '{name}' has no coordinates")))?;

    let (rating, review_count) = raw
        .rating_text
        .as_deref()
        .map(parse_rating_text)
        .unwrap_or((None, 0));
    let price_level = raw
        .price_text
        .as_deref()
        .map(classify_price_text)
        .unwrap_or(PriceLevel::Unknown);

    let distance_km = haversine_km(center, coordinates);
    let composite_score = scorer.score(rating, distance_km, price_level);

    Ok(Place {
        id: place_id(name, coordinates),
        name: name.to_string(),
        rating,
        review_count,
        price_level,
        coordinates,
        distance_km,
        image_ref: None,
        composite_score,
    })
}

/// Normalize a whole scrape pass. Unparseable records are skipped with
/// a warning; duplicate ids keep the last-seen record, since later
/// scroll passes tend to carry fuller data.
pub fn normalize_batch(raws: &[RawRecord], center: GeoPoint, scorer: &Scorer) -> Vec<Place> {
    let mut places: Vec<Place> = Vec::with_capacity(raws.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for raw in raws {
        match normalize(raw, center, scorer) {
            Ok(place) => match positions.get(&place.id) {
                Some(&slot) => places[slot] = place,
                None => {
                    positions.insert(place.id.clone(), places.len());
                    places.push(place);
                }
            },
            Err(err) => warn!(%err, "skipping unparseable scraped record"),
        }
    }

    places
}

/// Parse rating text such as `"4.5 stars (1,203)"` into the rating and
/// the review count. The rating is the first decimal token in the 0–5
/// range; the count is the next integer token after it.
fn parse_rating_text(text: &str) -> (Option<f64>, u64) {
    let tokens = numeric_tokens(text);
    let rating_slot = tokens.iter().position(|token| {
        let trimmed = token.trim_end_matches(['.', ',']);
        trimmed.contains('.')
            && trimmed
                .parse::<f64>()
                .map(|value| (0.0..=5.0).contains(&value))
                .unwrap_or(false)
    });

    let Some(slot) = rating_slot else {
        return (None, 0);
    };
    let rating = tokens[slot]
        .trim_end_matches(['.', ','])
        .parse::<f64>()
        .ok();
    let review_count = tokens[slot + 1..]
        .iter()
        .find_map(|token| token.replace(',', "").parse::<u64>().ok())
        .unwrap_or(0);

    (rating, review_count)
}

fn numeric_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Classify free-text price signals by their currency-glyph count:
/// `"$"` reads cheap, `"$$"` mid, `"$$$"` and longer expensive.
/// Anything without a recognizable glyph stays [`PriceLevel::Unknown`].
fn classify_price_text(text: &str) -> PriceLevel {
    match text.chars().filter(|c| CURRENCY_GLYPHS.contains(c)).count() {
        0 => PriceLevel::Unknown,
        1 => PriceLevel::Low,
        2 => PriceLevel::Mid,
        _ => PriceLevel::High,
    }
}

/// Decode the `!3d<lat>!4d<lon>` coordinate segment carried by result
/// links.
fn coordinates_from_url(url: &str) -> Option<GeoPoint> {
    let after_lat = url.split_once("!3d")?.1;
    let (lat, rest) = take_signed_number(after_lat)?;
    let after_lon = rest.split_once("!4d")?.1;
    let (lon, _) = take_signed_number(after_lon)?;

    let point = GeoPoint::new(lat, lon);
    point.in_bounds().then_some(point)
}

fn take_signed_number(text: &str) -> Option<(f64, &str)> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(text.len());
    let (token, rest) = text.split_at(end);
    token.parse::<f64>().ok().map(|value| (value, rest))
}
