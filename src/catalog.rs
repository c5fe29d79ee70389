//! Listing queries over synced records: filters, facet values, paging.

use crate::images::dedupe_preserving_order;
use crate::models::InventoryRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_PAGE_SIZE: usize = 9;
pub const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/300x200?text=No+Image";

/// Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogFilter {
    pub grade: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub model_year: Option<String>,
}

impl CatalogFilter {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, record: &InventoryRecord) -> bool {
        let price = leading_number(&record.price);
        self.grade.as_ref().is_none_or(|g| &record.grade == g)
            && self.model_year.as_ref().is_none_or(|y| &record.model_year == y)
            && self
                .min_price
                .is_none_or(|min| price.is_some_and(|p| p >= min))
            && self
                .max_price
                .is_none_or(|max| price.is_some_and(|p| p <= max))
    }

    pub fn apply<'a>(&self, records: &'a [InventoryRecord]) -> Vec<&'a InventoryRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Numeric prefix of free-text prices: `"1500000 BDT"` is 1500000, `"TBA"` is
/// `None`.
pub fn leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, ch) in trimmed.char_indices() {
        match ch {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            '+' | '-' if i == 0 => {}
            _ => break,
        }
        end = i + ch.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    trimmed[..end].parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Facets {
    pub grades: Vec<String>,
    pub model_years: Vec<String>,
}

impl Facets {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a InventoryRecord>,
    {
        let mut grades = BTreeSet::new();
        let mut model_years = BTreeSet::new();
        for record in records {
            grades.insert(record.grade.clone());
            model_years.insert(record.model_year.clone());
        }
        Self {
            grades: grades.into_iter().collect(),
            model_years: model_years.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    pub page: usize,
    pub total_pages: usize,
}

impl<T> Page<'_, T> {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// `page` is 1-based; a page past the end is empty.
pub fn paginate<T>(items: &[T], page: usize, per_page: usize) -> Page<'_, T> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total_pages = items.len().div_ceil(per_page);
    let start = (page - 1).saturating_mul(per_page).min(items.len());
    let end = start.saturating_add(per_page).min(items.len());
    Page {
        items: &items[start..end],
        page,
        total_pages,
    }
}

/// Hosted images in order without repeats, then the placeholder.
pub fn cover_candidates(record: &InventoryRecord, placeholder: &str) -> Vec<String> {
    let mut candidates = dedupe_preserving_order(record.optimized_images.iter().cloned());
    if !placeholder.is_empty() && !candidates.iter().any(|c| c == placeholder) {
        candidates.push(placeholder.to_string());
    }
    candidates
}
