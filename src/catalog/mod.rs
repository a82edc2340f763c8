//! Product Catalog
//!
//! In-memory product index with exact, fuzzy and barcode lookup.
//! Loaded once at startup and read-only afterwards.

pub mod fuzzy;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::error::CatalogLoadError;

pub use fuzzy::{normalize_name, similarity};

/// Default acceptance threshold for fuzzy matches (0-100 scale, exclusive)
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 70.0;

/// Score reported for an exact name match
pub const EXACT_MATCH_SCORE: f64 = 100.0;

/// A purchasable catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// A detection label resolved against the catalog
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub product: &'a Product,
    /// Match score (0-100), 100 for exact matches
    pub score: f64,
    pub exact: bool,
}

/// Catalog records as they appear in the source file. Required fields are
/// optional here so that a missing field produces a precise error.
#[derive(Debug, Deserialize)]
struct RawProduct {
    product_id: Option<RawId>,
    name: Option<String>,
    price: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    barcode: Option<RawId>,
    #[serde(default)]
    size: Option<String>,
}

/// Identifiers are strings in some exports and integers in others
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Read-only product index
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    /// Products keyed (and therefore ordered) by product_id
    products: BTreeMap<String, Product>,
    /// Normalized name -> product_id (lowest id wins on duplicate names)
    by_name: HashMap<String, String>,
    /// Barcode -> product_id
    by_barcode: HashMap<String, String>,
    fuzzy_threshold: f64,
}

impl CatalogIndex {
    /// Load a catalog from a JSON file containing an array of products
    pub fn load(path: &Path) -> Result<Self, CatalogLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&content)?;
        info!("Loaded {} products from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Parse a catalog from a JSON array
    pub fn from_json(content: &str) -> Result<Self, CatalogLoadError> {
        let raw: Vec<RawProduct> = serde_json::from_str(content)?;
        let mut products = Vec::with_capacity(raw.len());

        for (index, record) in raw.into_iter().enumerate() {
            let product_id = record
                .product_id
                .map(RawId::into_string)
                .filter(|id| !id.trim().is_empty())
                .ok_or(CatalogLoadError::MissingField { index, field: "product_id" })?;
            let name = record
                .name
                .filter(|n| !n.trim().is_empty())
                .ok_or(CatalogLoadError::MissingField { index, field: "name" })?;
            let price = record
                .price
                .ok_or(CatalogLoadError::MissingField { index, field: "price" })?;

            if !price.is_finite() || price < 0.0 {
                return Err(CatalogLoadError::InvalidPrice { index, product_id, price });
            }

            products.push(Product {
                product_id,
                name,
                price,
                category: record.category,
                barcode: record.barcode.map(RawId::into_string),
                size: record.size,
            });
        }

        Self::from_products(products)
    }

    /// Build an index from already-validated products
    pub fn from_products(products: Vec<Product>) -> Result<Self, CatalogLoadError> {
        let mut index = Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            ..Self::default()
        };

        for product in products {
            if index.products.contains_key(&product.product_id) {
                return Err(CatalogLoadError::DuplicateId(product.product_id));
            }
            index.products.insert(product.product_id.clone(), product);
        }

        // Secondary indexes are built in product_id order so the lowest id
        // owns a duplicated name or barcode.
        for (id, product) in &index.products {
            index
                .by_name
                .entry(normalize_name(&product.name))
                .or_insert_with(|| id.clone());
            if let Some(barcode) = product.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
                index
                    .by_barcode
                    .entry(barcode.to_string())
                    .or_insert_with(|| id.clone());
            }
        }

        Ok(index)
    }

    /// Override the fuzzy acceptance threshold (0-100, exclusive)
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// All products in product_id order
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// Product names, used as the label space of the simulated backend
    pub fn labels(&self) -> Vec<String> {
        self.products.values().map(|p| p.name.clone()).collect()
    }

    pub fn get(&self, product_id: &str) -> Option<&Product> {
        self.products.get(product_id)
    }

    /// Case-insensitive, whitespace-normalized name equality
    pub fn find_exact(&self, name: &str) -> Option<&Product> {
        self.by_name
            .get(&normalize_name(name))
            .and_then(|id| self.products.get(id))
    }

    /// Best fuzzy match above the acceptance threshold.
    ///
    /// Ties on the top score go to the lowest product_id; iteration is in
    /// product_id order and only a strictly better score replaces the best.
    pub fn find_fuzzy(&self, name: &str) -> Option<(&Product, f64)> {
        let mut best: Option<(&Product, f64)> = None;

        for product in self.products.values() {
            let score = similarity(name, &product.name);
            if score <= self.fuzzy_threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((product, score)),
            }
        }

        if let Some((product, score)) = best {
            debug!("Fuzzy matched '{}' -> '{}' ({:.1})", name, product.name, score);
        }
        best
    }

    /// Exact barcode equality
    pub fn find_by_barcode(&self, code: &str) -> Option<&Product> {
        self.by_barcode
            .get(code.trim())
            .and_then(|id| self.products.get(id))
    }

    /// Resolve a detection label: exact match first, fuzzy only as a fallback
    pub fn resolve(&self, label: &str) -> Option<MatchResult<'_>> {
        if let Some(product) = self.find_exact(label) {
            return Some(MatchResult {
                product,
                score: EXACT_MATCH_SCORE,
                exact: true,
            });
        }

        self.find_fuzzy(label).map(|(product, score)| MatchResult {
            product,
            score,
            exact: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> CatalogIndex {
        CatalogIndex::from_json(
            r#"[
                {"product_id": "p1", "name": "Lay's Classic Potato Chips", "price": 20.0, "barcode": "8901491101837"},
                {"product_id": "p2", "name": "Amul Butter 100g", "price": 56.0, "category": "Dairy"},
                {"product_id": "p3", "name": "Tata Salt 1kg", "price": 28.0, "size": "1 kg"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_find_exact_is_case_and_whitespace_insensitive() {
        let catalog = sample_catalog();
        let product = catalog.find_exact("  lay's   CLASSIC potato chips ").unwrap();
        assert_eq!(product.product_id, "p1");
        assert!(catalog.find_exact("Lays").is_none());
    }

    #[test]
    fn test_find_fuzzy_accepts_close_names() {
        let catalog = sample_catalog();
        let (product, score) = catalog.find_fuzzy("Amul Buter 100g").unwrap();
        assert_eq!(product.product_id, "p2");
        assert!(score > DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_find_fuzzy_rejects_distant_names() {
        let catalog = sample_catalog();
        assert!(catalog.find_fuzzy("Unknown Snack Brand").is_none());
    }

    #[test]
    fn test_find_fuzzy_tie_prefers_lowest_product_id() {
        let catalog = CatalogIndex::from_json(
            r#"[
                {"product_id": "b", "name": "Green Tea", "price": 5},
                {"product_id": "a", "name": "Green Tea", "price": 6}
            ]"#,
        )
        .unwrap();
        let (product, _) = catalog.find_fuzzy("Green Tee").unwrap();
        assert_eq!(product.product_id, "a");
        assert_eq!(catalog.find_exact("green tea").unwrap().product_id, "a");
    }

    #[test]
    fn test_find_fuzzy_is_deterministic() {
        let catalog = sample_catalog();
        let first = catalog.find_fuzzy("tata salt").map(|(p, s)| (p.product_id.clone(), s));
        for _ in 0..10 {
            let again = catalog.find_fuzzy("tata salt").map(|(p, s)| (p.product_id.clone(), s));
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_resolve_prefers_exact() {
        let catalog = sample_catalog();
        let matched = catalog.resolve("tata salt 1KG").unwrap();
        assert!(matched.exact);
        assert_eq!(matched.score, EXACT_MATCH_SCORE);

        // Exact and fuzzy never disagree on an exact name
        let (fuzzy, _) = catalog.find_fuzzy("tata salt 1KG").unwrap();
        assert_eq!(fuzzy.product_id, matched.product.product_id);
    }

    #[test]
    fn test_find_by_barcode_is_exact() {
        let catalog = sample_catalog();
        assert_eq!(catalog.find_by_barcode("8901491101837").unwrap().product_id, "p1");
        assert!(catalog.find_by_barcode("890149110183").is_none());
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let catalog = CatalogIndex::from_json(
            r#"[{"product_id": 42, "name": "Bread", "price": 40, "barcode": 123456}]"#,
        )
        .unwrap();
        assert!(catalog.get("42").is_some());
        assert!(catalog.find_by_barcode("123456").is_some());
    }

    #[test]
    fn test_missing_required_field() {
        let err = CatalogIndex::from_json(r#"[{"product_id": "p1", "name": "Milk"}]"#).unwrap_err();
        assert!(matches!(err, CatalogLoadError::MissingField { index: 0, field: "price" }));

        let err = CatalogIndex::from_json(r#"[{"name": "Milk", "price": 1}]"#).unwrap_err();
        assert!(matches!(err, CatalogLoadError::MissingField { field: "product_id", .. }));
    }

    #[test]
    fn test_negative_price_rejected() {
        let err = CatalogIndex::from_json(r#"[{"product_id": "p1", "name": "Milk", "price": -1}]"#)
            .unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidPrice { .. }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = CatalogIndex::from_json(
            r#"[{"product_id": "p1", "name": "A", "price": 1}, {"product_id": "p1", "name": "B", "price": 2}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::DuplicateId(id) if id == "p1"));
    }

    #[test]
    fn test_malformed_and_unreadable_sources() {
        assert!(matches!(
            CatalogIndex::from_json("{not json"),
            Err(CatalogLoadError::Malformed(_))
        ));
        assert!(matches!(
            CatalogIndex::load(Path::new("/nonexistent/catalog.json")),
            Err(CatalogLoadError::Unreadable { .. })
        ));
    }
}
