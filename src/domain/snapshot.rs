//! Parsed upstream product data

use serde::{Deserialize, Serialize};

/// Prices for one variant, in whole currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTag {
    /// Pre-discount list price
    pub basic: i64,
    /// Current sale price
    pub sale: i64,
}

/// One variant (size) block of a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantBlock {
    pub name: String,
    pub orig_name: String,
    pub price: PriceTag,
    /// Quantity summed across all warehouse records
    pub qty: i64,
}

impl VariantBlock {
    /// Variant names "" and "0" mark single-variant products
    pub fn is_real(&self) -> bool {
        !self.name.is_empty() && self.name != "0"
    }
}

/// Everything one fetch learns about a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub variants: Vec<VariantBlock>,
}

impl ProductSnapshot {
    /// Whether the product carries real variants (sizes) the owner must
    /// choose between
    pub fn has_real_variants(&self) -> bool {
        self.variants.iter().any(VariantBlock::is_real)
    }

    /// Find the variant matching a stored selector
    pub fn variant_named(&self, selector: &str) -> Option<&VariantBlock> {
        self.variants.iter().find(|v| v.name == selector)
    }

    /// The single block of a variant-less product
    pub fn sole_variant(&self) -> Option<&VariantBlock> {
        self.variants.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(name: &str) -> VariantBlock {
        VariantBlock {
            name: name.to_string(),
            orig_name: name.to_string(),
            price: PriceTag {
                basic: 100,
                sale: 90,
            },
            qty: 1,
        }
    }

    #[test]
    fn test_real_variant_detection() {
        let snapshot = ProductSnapshot {
            name: "socks".to_string(),
            variants: vec![block("0")],
        };
        assert!(!snapshot.has_real_variants());

        let snapshot = ProductSnapshot {
            name: "shoes".to_string(),
            variants: vec![block(""), block("42")],
        };
        assert!(snapshot.has_real_variants());
        assert!(snapshot.variant_named("42").is_some());
        assert!(snapshot.variant_named("43").is_none());
    }
}
