//! Free-promotion detection over PICS product descriptors.
//!
//! Resolution happens in two phases. The batched product-info answer for a change
//! window is scanned for the `extended/freepromotion` marker, producing
//! [`PartialPromotion`]s. Each partial is then looked up again on its own, and the
//! full app descriptor supplies the display name and header image.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::keyvalue::{KeyValueError, KeyValueTree};

pub const STEAM_CDN_APPS_BASE: &str = "https://cdn.cloudflare.steamstatic.com/steam/apps/";
pub const STEAM_STORE_APP_BASE: &str = "https://store.steampowered.com/app/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialPromotion {
    pub app_id: u32,
    pub start_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullPromotion {
    pub app_id: u32,
    pub start_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub name: String,
    pub image_url: Option<String>,
}

impl FullPromotion {
    pub fn store_url(&self) -> String {
        store_url(self.app_id)
    }
}

pub fn store_url(app_id: u32) -> String {
    format!("{STEAM_STORE_APP_BASE}{app_id}")
}

pub fn header_image_url(app_id: u32, token: &str) -> String {
    format!("{STEAM_CDN_APPS_BASE}{app_id}/{token}")
}

/// Presence of `extended/freepromotion`; its value is not inspected.
pub fn has_free_promotion_marker(product: &KeyValueTree) -> bool {
    product
        .get("extended")
        .map(|ext| ext.has("freepromotion"))
        .unwrap_or(false)
}

fn parse_unix_seconds(product: &KeyValueTree, segments: &[&str]) -> Result<DateTime<Utc>, KeyValueError> {
    let secs: i64 = product.parse_at(segments)?;
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| KeyValueError::Malformed {
        key: segments.join("/"),
        value: secs.to_string(),
        reason: "timestamp out of range".into(),
    })
}

/// Reads the three promotion leaves of a product that carries the marker.
pub fn partial_promotion(product: &KeyValueTree) -> Result<PartialPromotion, KeyValueError> {
    let app_id: u32 = product.parse_at(&["appids", "0"])?;
    let start_time = parse_unix_seconds(product, &["extended", "starttime"])?;
    let expiry_time = parse_unix_seconds(product, &["extended", "expirytime"])?;
    Ok(PartialPromotion {
        app_id,
        start_time,
        expiry_time,
    })
}

/// Scans a batch of product trees and keeps every well-formed promotion.
///
/// Products without the marker are ignored. Marked products whose leaves are missing
/// or unparseable are dropped with a debug log; they never fail the batch.
pub fn find_partial_promotions<'a, I>(products: I) -> Vec<PartialPromotion>
where
    I: IntoIterator<Item = &'a KeyValueTree>,
{
    let mut out = Vec::new();
    for product in products {
        if !has_free_promotion_marker(product) {
            continue;
        }
        match partial_promotion(product) {
            Ok(partial) => out.push(partial),
            Err(e) => {
                debug!(product = product.name(), error = %e, "skipping malformed promotion candidate");
            }
        }
    }
    out
}

/// Picks the header image token: `english` first, then the first localisation.
pub fn select_header_image(header_image: &KeyValueTree) -> Option<&str> {
    if let Ok(english) = header_image.get("english") {
        return Some(english.value());
    }
    header_image.first_child().map(|(_, child)| child.value())
}

/// Completes a partial promotion from the app's full descriptor.
///
/// Returns `None` when the product has no `common` section (typically delisted
/// between the two requests) or no display name.
pub fn resolve_full(partial: &PartialPromotion, product: &KeyValueTree) -> Option<FullPromotion> {
    let common = product.get("common").ok()?;
    let name = match common.get("name") {
        Ok(node) => node.value().to_string(),
        Err(e) => {
            debug!(app_id = partial.app_id, error = %e, "promotion app has no display name");
            return None;
        }
    };
    let image_url = common
        .get("header_image")
        .ok()
        .and_then(select_header_image)
        .map(|token| header_image_url(partial.app_id, token));

    Some(FullPromotion {
        app_id: partial.app_id,
        start_time: partial.start_time,
        expiry_time: partial.expiry_time,
        name,
        image_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::keyvalue::KeyValue;

    fn promo_package(appid: &str, start: &str, expiry: &str) -> KeyValueTree {
        KeyValueTree::from_descriptor(&KeyValue::node(
            "12345",
            vec![
                KeyValue::node("appids", vec![KeyValue::leaf("0", appid)]),
                KeyValue::node(
                    "extended",
                    vec![
                        KeyValue::leaf("freepromotion", "1"),
                        KeyValue::leaf("starttime", start),
                        KeyValue::leaf("expirytime", expiry),
                    ],
                ),
            ],
        ))
    }

    fn app_with_images(images: Vec<KeyValue>) -> KeyValueTree {
        KeyValueTree::from_descriptor(&KeyValue::node(
            "appinfo",
            vec![KeyValue::node(
                "common",
                vec![
                    KeyValue::leaf("name", "Some Game"),
                    KeyValue::node("header_image", images),
                ],
            )],
        ))
    }

    fn partial(app_id: u32) -> PartialPromotion {
        PartialPromotion {
            app_id,
            start_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            expiry_time: DateTime::<Utc>::from_timestamp(1_700_003_600, 0).unwrap(),
        }
    }

    #[test]
    fn well_formed_marker_yields_one_partial() {
        let products = vec![promo_package("100", "1700000000", "1700003600")];
        let found = find_partial_promotions(&products);
        assert_eq!(found, vec![partial(100)]);
    }

    #[test]
    fn products_without_marker_yield_nothing() {
        let no_extended = KeyValueTree::from_descriptor(&KeyValue::node(
            "1",
            vec![KeyValue::node("appids", vec![KeyValue::leaf("0", "100")])],
        ));
        let extended_without_marker = KeyValueTree::from_descriptor(&KeyValue::node(
            "2",
            vec![
                KeyValue::node("appids", vec![KeyValue::leaf("0", "100")]),
                KeyValue::node(
                    "extended",
                    vec![
                        KeyValue::leaf("starttime", "1700000000"),
                        KeyValue::leaf("expirytime", "1700003600"),
                    ],
                ),
            ],
        ));
        assert!(find_partial_promotions([&no_extended, &extended_without_marker]).is_empty());
    }

    #[test]
    fn malformed_candidates_are_skipped_not_fatal() {
        let bad_appid = promo_package("abc", "1700000000", "1700003600");
        let negative_appid = promo_package("-5", "1700000000", "1700003600");
        let bad_time = promo_package("7", "soon", "1700003600");
        let missing_appids = KeyValueTree::from_descriptor(&KeyValue::node(
            "3",
            vec![KeyValue::node(
                "extended",
                vec![
                    KeyValue::leaf("freepromotion", ""),
                    KeyValue::leaf("starttime", "1700000000"),
                    KeyValue::leaf("expirytime", "1700003600"),
                ],
            )],
        ));
        let good = promo_package("8", "1700000000", "1700003600");

        let found = find_partial_promotions([
            &bad_appid,
            &negative_appid,
            &bad_time,
            &missing_appids,
            &good,
        ]);
        assert_eq!(found, vec![partial(8)]);
    }

    #[test]
    fn resolve_full_without_common_is_none() {
        let product = KeyValueTree::from_descriptor(&KeyValue::node(
            "appinfo",
            vec![KeyValue::node("extended", vec![])],
        ));
        assert_eq!(resolve_full(&partial(100), &product), None);
    }

    #[test]
    fn header_image_prefers_english() {
        let product = app_with_images(vec![
            KeyValue::leaf("german", "xyz.jpg"),
            KeyValue::leaf("english", "abc.jpg"),
        ]);
        let full = resolve_full(&partial(100), &product).unwrap();
        assert_eq!(full.name, "Some Game");
        assert_eq!(
            full.image_url.as_deref(),
            Some("https://cdn.cloudflare.steamstatic.com/steam/apps/100/abc.jpg")
        );
        assert_eq!(full.store_url(), "https://store.steampowered.com/app/100");
    }

    #[test]
    fn header_image_falls_back_to_first_localisation() {
        let product = app_with_images(vec![KeyValue::leaf("german", "xyz.jpg")]);
        let full = resolve_full(&partial(100), &product).unwrap();
        assert_eq!(
            full.image_url.as_deref(),
            Some("https://cdn.cloudflare.steamstatic.com/steam/apps/100/xyz.jpg")
        );
    }

    #[test]
    fn header_image_without_children_is_none() {
        let product = app_with_images(vec![]);
        let full = resolve_full(&partial(100), &product).unwrap();
        assert_eq!(full.image_url, None);
        assert_eq!(full.start_time, partial(100).start_time);
    }
}
