//! Least-common-denominator fallback used when product detection fails or
//! returns a server this engine doesn't otherwise recognize. No capability
//! is assumed; callers should expect `UnsupportedFeature` from anything
//! beyond bare parameterized SELECT/INSERT/UPDATE/DELETE.

use super::{identifier, Capabilities, DbProduct, Dialect, ParamMarkerStyle, ProductInfo, SqlStandard};

#[derive(Debug, Clone)]
pub struct Sql92Dialect {
    info: ProductInfo,
}

impl Sql92Dialect {
    pub fn new() -> Self {
        Self {
            info: ProductInfo {
                standard: SqlStandard::Sql92,
                ..ProductInfo::unknown()
            },
        }
    }
}

impl Default for Sql92Dialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for Sql92Dialect {
    fn product(&self) -> DbProduct {
        DbProduct::Unknown
    }

    fn product_info(&self) -> &ProductInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn param_marker_style(&self) -> ParamMarkerStyle {
        ParamMarkerStyle::Positional('?')
    }

    fn max_parameters(&self) -> usize {
        // Conservative floor shared by every dialect this engine targets.
        999
    }

    fn quote_identifier_unchecked(&self, name: &str) -> String {
        identifier::wrap_with_quotes(name, '"', '"')
    }

    fn upsert_incoming_column(&self, column: &str) -> String {
        // No dialect-neutral upsert exists; callers that hit this path
        // should have already rejected the request via `capabilities()`.
        self.quote_identifier_unchecked(column)
    }

    fn session_settings(&self, _read_only: bool) -> Vec<String> {
        vec![]
    }
}
