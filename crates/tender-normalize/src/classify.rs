//! Keyword scoring for sector and tender type.
//!
//! A keyword found in the title scores 3, in the description 1. The best
//! category wins only when it reaches [`MIN_SCORE`] and is not tied.

pub const TITLE_WEIGHT: u32 = 3;
pub const DESCRIPTION_WEIGHT: u32 = 1;
pub const MIN_SCORE: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct Category {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

pub const SECTORS: &[Category] = &[
    Category {
        name: "IT",
        keywords: &[
            "software", "hardware", "computer", "computers", "laptop", "laptops", "ict", "network",
            "networking", "server", "servers", "database", "website", "cybersecurity",
            "information technology", "it equipment", "telecommunications", "digital",
        ],
    },
    Category {
        name: "Construction",
        keywords: &[
            "construction", "rehabilitation", "building", "buildings", "road", "roads", "bridge",
            "civil works", "renovation", "refurbishment",
        ],
    },
    Category {
        name: "Health",
        keywords: &[
            "health", "medical", "hospital", "pharmaceutical", "pharmaceuticals", "medicines",
            "vaccine", "vaccines", "clinic", "laboratory", "diagnostic",
        ],
    },
    Category {
        name: "Education",
        keywords: &[
            "education", "school", "schools", "university", "teachers", "textbooks", "curriculum",
            "learning",
        ],
    },
    Category {
        name: "Energy",
        keywords: &[
            "energy", "solar", "electricity", "power", "generator", "generators",
            "electrification", "fuel", "grid",
        ],
    },
    Category {
        name: "Water & Sanitation",
        keywords: &[
            "water", "sanitation", "sewerage", "wastewater", "borehole", "boreholes", "hygiene",
            "wash",
        ],
    },
    Category {
        name: "Agriculture",
        keywords: &[
            "agriculture", "agricultural", "farming", "seeds", "fertilizer", "livestock",
            "irrigation", "crops",
        ],
    },
    Category {
        name: "Transport",
        keywords: &[
            "transport", "vehicle", "vehicles", "fleet", "aviation", "railway", "logistics",
            "port",
        ],
    },
    Category {
        name: "Consulting",
        keywords: &[
            "consultancy", "consulting", "advisory", "feasibility study", "technical assistance",
            "evaluation",
        ],
    },
    Category {
        name: "Security",
        keywords: &["security", "guarding", "surveillance", "cctv", "defense", "defence"],
    },
    Category {
        name: "Environment",
        keywords: &[
            "environmental", "climate", "biodiversity", "waste management", "forestry",
            "conservation",
        ],
    },
    Category {
        name: "Finance",
        keywords: &[
            "audit", "financial", "banking", "insurance", "accounting", "microfinance",
        ],
    },
];

pub const TENDER_TYPES: &[Category] = &[
    Category {
        name: "Goods",
        keywords: &[
            "supply", "purchase", "delivery", "equipment", "goods", "materials", "acquisition",
            "procurement of",
        ],
    },
    Category {
        name: "Works",
        keywords: &["works", "construction", "rehabilitation", "building", "civil works"],
    },
    Category {
        name: "Services",
        keywords: &["services", "service", "maintenance", "cleaning", "catering", "hosting"],
    },
    Category {
        name: "Consulting Services",
        keywords: &[
            "consultant", "consultancy", "consulting", "consulting services", "advisory",
            "expression of interest", "terms of reference", "individual consultant",
        ],
    },
    Category {
        name: "Grant",
        keywords: &[
            "grant", "grants", "funding opportunity", "cooperative agreement",
            "call for proposals",
        ],
    },
];

/// Lowercased text padded with single spaces between alphanumeric tokens.
fn padded(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        out.push_str(&token.to_lowercase());
        out.push(' ');
    }
    out
}

fn hits(haystack: &str, keywords: &[&str]) -> u32 {
    keywords
        .iter()
        .filter(|k| haystack.contains(&format!(" {k} ")))
        .count() as u32
}

pub fn score(category: &Category, title: Option<&str>, description: Option<&str>) -> u32 {
    let title = title.map(padded).unwrap_or_default();
    let description = description.map(padded).unwrap_or_default();
    hits(&title, category.keywords) * TITLE_WEIGHT
        + hits(&description, category.keywords) * DESCRIPTION_WEIGHT
}

/// Highest-scoring category, or `None` on a tie or a sub-threshold best.
pub fn classify(
    categories: &[Category],
    title: Option<&str>,
    description: Option<&str>,
) -> Option<&'static str> {
    let mut best: Option<(&'static str, u32)> = None;
    let mut tied = false;
    for category in categories {
        let s = score(category, title, description);
        match best {
            Some((_, top)) if s == top => tied = true,
            Some((_, top)) if s < top => {}
            _ => {
                best = Some((category.name, s));
                tied = false;
            }
        }
    }
    match best {
        Some((name, s)) if s >= MIN_SCORE && !tied => Some(name),
        _ => None,
    }
}

pub fn infer_sector(title: Option<&str>, description: Option<&str>) -> Option<&'static str> {
    classify(SECTORS, title, description)
}

pub fn infer_tender_type(title: Option<&str>, description: Option<&str>) -> Option<&'static str> {
    classify(TENDER_TYPES, title, description)
}

/// Canonical spelling when `text` names a category outright.
pub fn canonical_name(categories: &[Category], text: &str) -> Option<&'static str> {
    let text = text.trim();
    categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(text))
        .map(|c| c.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_hits_outweigh_description_hits() {
        let sector = infer_sector(
            Some("Supply of laptops"),
            Some("Delivery to the district hospital"),
        );
        assert_eq!(sector, Some("IT"));
    }

    #[test]
    fn ties_yield_none() {
        assert_eq!(infer_sector(Some("Solar water pumps"), None), None);
    }

    #[test]
    fn weak_evidence_yields_none() {
        assert_eq!(infer_sector(None, Some("generic notice about a school")), None);
        assert_eq!(infer_sector(None, Some("school teachers")), Some("Education"));
        assert_eq!(infer_sector(None, None), None);
    }

    #[test]
    fn tender_types() {
        assert_eq!(infer_tender_type(Some("Supply of Generators"), None), Some("Goods"));
        assert_eq!(
            infer_tender_type(Some("Consulting services for audit"), None),
            Some("Consulting Services")
        );
        assert_eq!(
            infer_tender_type(Some("FY26 Small Business Innovation Grant"), None),
            Some("Grant")
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert_eq!(infer_sector(Some("Reporting templates"), None), None);
        assert_eq!(canonical_name(TENDER_TYPES, " works "), Some("Works"));
        assert_eq!(canonical_name(TENDER_TYPES, "other"), None);
    }
}
