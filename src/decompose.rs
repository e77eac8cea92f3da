//! Product record → six normalized row sets.
//!
//! Qualification is checked on the raw JSON first, so records that are
//! skipped are never shape-checked. Qualifying records are then typed
//! against [`ProductRecord`]; a malformed optional field fails the page.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::db::{
    AllergenRow, BrandRow, CategoryRow, IngredientRow, NutrientRow, PageCounts, ProductRow,
};
use crate::error::DecomposeError;

const PRIMARY_LANG: &str = "en";

/// Catalog handle that may arrive as a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(String);

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Identifier(s),
            Raw::Number(n) => Identifier(n.to_string()),
        })
    }
}

/// Value of one `nutriments` entry. Units are mixed in the same mapping,
/// so anything scalar is accepted; nested values are a shape error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NutrientValue {
    Number(serde_json::Number),
    Text(String),
    Flag(bool),
    Null(()),
}

impl NutrientValue {
    pub fn to_text(&self) -> Option<String> {
        match self {
            NutrientValue::Number(n) => Some(n.to_string()),
            NutrientValue::Text(s) => Some(s.clone()),
            NutrientValue::Flag(b) => Some(b.to_string()),
            NutrientValue::Null(()) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngredientEntry {
    pub id: Identifier,
    pub text: String,
}

/// Typed view of a qualifying product. Every optional field is either
/// absent (or `null`) or has exactly this shape.
#[derive(Debug, Deserialize)]
pub struct ProductRecord {
    pub id: Option<Identifier>,
    #[serde(rename = "_id")]
    pub internal_id: Option<Identifier>,
    pub product_name: String,
    pub ingredients: Option<Vec<IngredientEntry>>,
    pub allergens_tags: Option<Vec<String>>,
    pub nutriments: Option<BTreeMap<String, NutrientValue>>,
    pub brands_tags: Option<Vec<String>>,
    pub categories_tags: Option<Vec<String>>,
}

impl ProductRecord {
    fn has_children(&self) -> bool {
        self.ingredients.as_ref().is_some_and(|v| !v.is_empty())
            || self.allergens_tags.as_ref().is_some_and(|v| !v.is_empty())
            || self.nutriments.as_ref().is_some_and(|m| !m.is_empty())
            || self.brands_tags.as_ref().is_some_and(|v| !v.is_empty())
            || self.categories_tags.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// All rows produced from one page.
#[derive(Debug, Default)]
pub struct DecomposedPage {
    pub products: Vec<ProductRow>,
    pub ingredients: Vec<IngredientRow>,
    pub allergens: Vec<AllergenRow>,
    pub nutrients: Vec<NutrientRow>,
    pub brands: Vec<BrandRow>,
    pub categories: Vec<CategoryRow>,
}

impl DecomposedPage {
    pub fn counts(&self) -> PageCounts {
        PageCounts {
            products: self.products.len(),
            ingredients: self.ingredients.len(),
            allergens: self.allergens.len(),
            nutrients: self.nutrients.len(),
            brands: self.brands.len(),
            categories: self.categories.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

/// English listing with a non-blank name.
pub fn qualifies(record: &Value) -> bool {
    record.get("lang").and_then(Value::as_str) == Some(PRIMARY_LANG)
        && record
            .get("product_name")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.trim().is_empty())
}

pub fn decompose_page(products: &[Value]) -> Result<DecomposedPage, DecomposeError> {
    let mut page = DecomposedPage::default();
    for (index, raw) in products.iter().enumerate() {
        if !qualifies(raw) {
            continue;
        }
        decompose_record(index, raw, &mut page)?;
    }
    Ok(page)
}

fn decompose_record(
    index: usize,
    raw: &Value,
    out: &mut DecomposedPage,
) -> Result<(), DecomposeError> {
    let label = display_label(raw);
    let record = ProductRecord::deserialize(raw).map_err(|source| DecomposeError::Shape {
        index,
        product: label.clone(),
        source,
    })?;

    let missing = |field: &'static str| DecomposeError::MissingField {
        index,
        product: label.clone(),
        field,
    };

    let product_id = record.id.as_ref().ok_or_else(|| missing("id"))?.to_string();
    let internal_id = record.internal_id.as_ref().map(Identifier::to_string);

    // Child rows join on the internal id, not the display id.
    let owner = if record.has_children() {
        internal_id.clone().ok_or_else(|| missing("_id"))?
    } else {
        String::new()
    };

    out.products.push(ProductRow {
        product_id,
        internal_id,
        product_name: record.product_name,
    });

    for ingredient in record.ingredients.unwrap_or_default() {
        out.ingredients.push(IngredientRow {
            product_id: owner.clone(),
            ingredient_id: ingredient.id.to_string(),
            ingredient_name: ingredient.text,
        });
    }

    for allergen_id in record.allergens_tags.unwrap_or_default() {
        out.allergens.push(AllergenRow {
            product_id: owner.clone(),
            allergen_id,
        });
    }

    for (nutrient_name, value) in record.nutriments.unwrap_or_default() {
        out.nutrients.push(NutrientRow {
            product_id: owner.clone(),
            nutrient_name,
            nutrient_value: value.to_text(),
        });
    }

    for brand_id in record.brands_tags.unwrap_or_default() {
        out.brands.push(BrandRow {
            product_id: owner.clone(),
            brand_id,
        });
    }

    for category_id in record.categories_tags.unwrap_or_default() {
        out.categories.push(CategoryRow {
            product_id: owner.clone(),
            category_id,
        });
    }

    Ok(())
}

fn display_label(raw: &Value) -> String {
    match raw.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "<no id>".to_string(),
    }
}
