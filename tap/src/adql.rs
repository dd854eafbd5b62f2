//! ADQL builders for positional searches.

use std::fmt;

use crate::error::{TapError, TapResult};
use crate::request::is_identifier;
use crate::tables::TableName;

/// ICRS position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl Coordinate {
    pub fn new(ra_deg: f64, dec_deg: f64) -> TapResult<Self> {
        if !ra_deg.is_finite() || !(0.0..360.0).contains(&ra_deg) {
            return Err(TapError::InvalidInput(format!(
                "right ascension {ra_deg} outside [0, 360)"
            )));
        }
        if !dec_deg.is_finite() || !(-90.0..=90.0).contains(&dec_deg) {
            return Err(TapError::InvalidInput(format!(
                "declination {dec_deg} outside [-90, 90]"
            )));
        }
        Ok(Self { ra_deg, dec_deg })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.ra_deg, self.dec_deg)
    }
}

/// Positional search over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalSearch {
    pub table: TableName,
    pub ra_column: String,
    pub dec_column: String,
    /// Columns to select; `*` when empty
    pub columns: Vec<String>,
    pub top: Option<u64>,
}

impl PositionalSearch {
    pub fn new(table: &str) -> TapResult<Self> {
        Ok(Self {
            table: table.parse()?,
            ra_column: "ra".to_string(),
            dec_column: "dec".to_string(),
            columns: Vec::new(),
            top: None,
        })
    }

    pub fn position_columns(mut self, ra: &str, dec: &str) -> Self {
        self.ra_column = ra.to_string();
        self.dec_column = dec.to_string();
        self
    }

    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    fn validate(&self) -> TapResult<()> {
        let names = [&self.ra_column, &self.dec_column]
            .into_iter()
            .chain(self.columns.iter().filter(|c| c.as_str() != "*"));
        for name in names {
            if !is_identifier(name) {
                return Err(TapError::InvalidInput(format!(
                    "'{name}' is not a valid column name"
                )));
            }
        }
        Ok(())
    }

    fn select(&self, extra: Option<String>) -> String {
        let mut select = String::from("SELECT ");
        if let Some(top) = self.top {
            select.push_str(&format!("TOP {top} "));
        }
        let mut columns = if self.columns.is_empty() {
            vec!["*".to_string()]
        } else {
            self.columns.clone()
        };
        columns.extend(extra);
        select.push_str(&columns.join(", "));
        select
    }

    fn point(&self) -> String {
        format!("POINT('ICRS', {}, {})", self.ra_column, self.dec_column)
    }

    /// Rows within `radius_deg` of `center`, nearest first, with the
    /// separation in a `dist` column.
    pub fn cone(&self, center: Coordinate, radius_deg: f64) -> TapResult<String> {
        self.validate()?;
        if !radius_deg.is_finite() || radius_deg <= 0.0 || radius_deg > 180.0 {
            return Err(TapError::InvalidInput(format!(
                "cone radius {radius_deg} must be in (0, 180] degrees"
            )));
        }
        let center_point = format!("POINT('ICRS', {}, {})", center.ra_deg, center.dec_deg);
        let distance = format!("DISTANCE({}, {center_point})", self.point());
        Ok(format!(
            "{} FROM {} WHERE 1 = CONTAINS({}, CIRCLE('ICRS', {}, {}, {radius_deg})) ORDER BY dist ASC",
            self.select(Some(format!("{distance} AS dist"))),
            self.table,
            self.point(),
            center.ra_deg,
            center.dec_deg,
        ))
    }

    /// Rows inside a box of `width_deg` by `height_deg` centred on `center`.
    pub fn rectangle(&self, center: Coordinate, width_deg: f64, height_deg: f64) -> TapResult<String> {
        self.validate()?;
        for (label, size) in [("width", width_deg), ("height", height_deg)] {
            if !size.is_finite() || size <= 0.0 || size > 360.0 {
                return Err(TapError::InvalidInput(format!(
                    "box {label} {size} must be in (0, 360] degrees"
                )));
            }
        }
        Ok(format!(
            "{} FROM {} WHERE 1 = CONTAINS({}, BOX('ICRS', {}, {}, {width_deg}, {height_deg}))",
            self.select(None),
            self.table,
            self.point(),
            center.ra_deg,
            center.dec_deg,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-1.0, 0.0)]
    #[case(360.0, 0.0)]
    #[case(10.0, 90.5)]
    #[case(f64::NAN, 0.0)]
    fn test_invalid_coordinates(#[case] ra: f64, #[case] dec: f64) {
        assert!(Coordinate::new(ra, dec).is_err());
    }

    #[test]
    fn test_cone_search() {
        let center = Coordinate::new(56.75, 24.1167).unwrap();
        let adql = PositionalSearch::new("gaiadr3.gaia_source")
            .unwrap()
            .columns(&["source_id", "phot_g_mean_mag"])
            .top(50)
            .cone(center, 0.5)
            .unwrap();
        assert_eq!(
            adql,
            "SELECT TOP 50 source_id, phot_g_mean_mag, \
             DISTANCE(POINT('ICRS', ra, dec), POINT('ICRS', 56.75, 24.1167)) AS dist \
             FROM gaiadr3.gaia_source \
             WHERE 1 = CONTAINS(POINT('ICRS', ra, dec), CIRCLE('ICRS', 56.75, 24.1167, 0.5)) \
             ORDER BY dist ASC"
        );
    }

    #[test]
    fn test_box_search() {
        let adql = PositionalSearch::new("ivoa.obscore")
            .unwrap()
            .position_columns("s_ra", "s_dec")
            .rectangle(Coordinate::new(10.0, -5.0).unwrap(), 1.0, 2.0)
            .unwrap();
        assert_eq!(
            adql,
            "SELECT * FROM ivoa.obscore \
             WHERE 1 = CONTAINS(POINT('ICRS', s_ra, s_dec), BOX('ICRS', 10, -5, 1, 2))"
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        let search = PositionalSearch::new("t").unwrap();
        let center = Coordinate::new(0.0, 0.0).unwrap();
        assert!(search.cone(center, 0.0).is_err());
        assert!(search.rectangle(center, -1.0, 1.0).is_err());
        assert!(search
            .clone()
            .columns(&["ra; DROP TABLE t"])
            .cone(center, 1.0)
            .is_err());
        assert!(PositionalSearch::new("bad table").is_err());
    }
}
