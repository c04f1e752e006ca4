use serde::Serialize;
use std::cmp::Ordering;

/// VB6-compatible 2-decimal rounding inherited from the legacy report sheets:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Percentage average at or above this counts as a pass.
pub const PASS_MARK_PERCENT: f64 = 50.0;

/// A component below this fraction of its ceiling earns an advisory warning.
const COMPONENT_WARN_FRACTION: f64 = 0.4;

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Per-component score ceilings for one subject. Their sum is the
/// ceiling for a student's total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentMaxima {
    pub test1: f64,
    pub test2: f64,
    pub exam: f64,
}

impl ComponentMaxima {
    pub fn ceiling(&self) -> f64 {
        self.test1 + self.test2 + self.exam
    }

    pub fn for_field(&self, field: ScoreField) -> f64 {
        match field {
            ScoreField::Test1 => self.test1,
            ScoreField::Test2 => self.test2,
            ScoreField::Exam => self.exam,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreField {
    Test1,
    Test2,
    Exam,
}

impl ScoreField {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test1" => Some(Self::Test1),
            "test2" => Some(Self::Test2),
            "exam" => Some(Self::Exam),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test1 => "test1",
            Self::Test2 => "test2",
            Self::Exam => "exam",
        }
    }
}

/// One student's raw marks for one cohort. `None` means the mark was never
/// entered, which is not the same thing as an entered 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawMarks {
    pub test1: Option<f64>,
    pub test2: Option<f64>,
    pub exam: Option<f64>,
}

impl RawMarks {
    /// True when no component has ever been entered.
    pub fn is_blank(&self) -> bool {
        self.test1.is_none() && self.test2.is_none() && self.exam.is_none()
    }

    pub fn set(&mut self, field: ScoreField, value: Option<f64>) {
        match field {
            ScoreField::Test1 => self.test1 = value,
            ScoreField::Test2 => self.test2 = value,
            ScoreField::Exam => self.exam = value,
        }
    }
}

/// Letter-grade boundary table, selected per cohort. The two tables in use
/// in schools we migrated never mix within one cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradeScheme {
    #[default]
    FiveBand,
    SixBand,
}

impl GradeScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "five_band" => Some(Self::FiveBand),
            "six_band" => Some(Self::SixBand),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiveBand => "five_band",
            Self::SixBand => "six_band",
        }
    }

    pub fn bands(&self) -> &'static [&'static str] {
        match self {
            Self::FiveBand => &["A", "B", "C", "D", "F"],
            Self::SixBand => &["A", "B", "C", "D", "E", "F"],
        }
    }

    /// Letter grade for a 0-100 percentage average.
    pub fn grade(&self, percent: f64) -> &'static str {
        match self {
            Self::FiveBand => {
                if percent >= 80.0 {
                    "A"
                } else if percent >= 70.0 {
                    "B"
                } else if percent >= 60.0 {
                    "C"
                } else if percent >= 50.0 {
                    "D"
                } else {
                    "F"
                }
            }
            Self::SixBand => {
                if percent >= 90.0 {
                    "A"
                } else if percent >= 80.0 {
                    "B"
                } else if percent >= 70.0 {
                    "C"
                } else if percent >= 60.0 {
                    "D"
                } else if percent >= 40.0 {
                    "E"
                } else {
                    "F"
                }
            }
        }
    }
}

/// Range-check a raw score against its component ceiling.
pub fn validate_score(value: f64, field: ScoreField, max: f64) -> Result<f64, GradingError> {
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(GradingError::new(
            "out_of_range",
            format!("{} must be between 0 and {}", field.as_str(), max),
        ));
    }
    Ok(value)
}

/// Parse-then-validate for text inputs (CSV cells, raw UI strings).
pub fn parse_score(raw: &str, field: ScoreField, max: f64) -> Result<f64, GradingError> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        GradingError::new(
            "out_of_range",
            format!("{} must be between 0 and {}", field.as_str(), max),
        )
    })?;
    validate_score(value, field, max)
}

/// Advisory sub-pass-mark check. Never a rejection; only meaningful
/// relative to the component's own ceiling.
pub fn component_warning(value: f64, field: ScoreField, max: f64) -> Option<String> {
    if max > 0.0 && value / max < COMPONENT_WARN_FRACTION {
        Some(format!(
            "{} is below {}% of its maximum ({})",
            field.as_str(),
            (COMPONENT_WARN_FRACTION * 100.0) as i64,
            max
        ))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMarks {
    pub total: f64,
    pub average: f64,
    pub grade: &'static str,
}

/// Recompute total, percentage average and letter grade for one entry.
/// Missing components count as 0 in the total; a fully blank entry has no
/// derived marks at all. Idempotent: same raw marks, same output.
pub fn compute_derived(
    marks: &RawMarks,
    maxima: &ComponentMaxima,
    scheme: GradeScheme,
) -> Option<DerivedMarks> {
    if marks.is_blank() {
        return None;
    }
    let total = marks.test1.unwrap_or(0.0) + marks.test2.unwrap_or(0.0) + marks.exam.unwrap_or(0.0);
    let ceiling = maxima.ceiling();
    let average = if ceiling > 0.0 {
        round_off_2_decimals(100.0 * total / ceiling)
    } else {
        0.0
    };
    Some(DerivedMarks {
        total,
        average,
        grade: scheme.grade(average),
    })
}

/// Assign 1-based positions by total, descending. The sort is stable, so
/// tied students keep their roster order. Entries with no total (never
/// scored) get no rank. For N scored entries the ranks are exactly 1..=N.
pub fn compute_ranks(totals: &[Option<f64>]) -> Vec<Option<u32>> {
    let mut scored: Vec<(usize, f64)> = totals
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.map(|v| (i, v)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut ranks: Vec<Option<u32>> = vec![None; totals.len()];
    for (position, (idx, _)) in scored.iter().enumerate() {
        ranks[*idx] = Some(position as u32 + 1);
    }
    ranks
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub pass_rate: f64,
}

impl ClassStatistics {
    pub fn zero() -> Self {
        Self {
            average: 0.0,
            highest: 0.0,
            lowest: 0.0,
            pass_rate: 0.0,
        }
    }
}

/// Class-level summary over the scored entries of one cohort. An empty (or
/// never-scored) cohort yields zeros everywhere, never NaN.
pub fn compute_statistics(deriveds: &[Option<DerivedMarks>]) -> ClassStatistics {
    let scored: Vec<&DerivedMarks> = deriveds.iter().flatten().collect();
    if scored.is_empty() {
        return ClassStatistics::zero();
    }

    let mut sum = 0.0;
    let mut highest = f64::MIN;
    let mut lowest = f64::MAX;
    let mut passed = 0usize;
    for d in &scored {
        sum += d.total;
        highest = highest.max(d.total);
        lowest = lowest.min(d.total);
        if d.average >= PASS_MARK_PERCENT {
            passed += 1;
        }
    }

    let n = scored.len() as f64;
    ClassStatistics {
        average: round_off_2_decimals(sum / n),
        highest,
        lowest,
        pass_rate: round_off_2_decimals(100.0 * passed as f64 / n),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBandCount {
    pub grade: &'static str,
    pub count: usize,
}

/// Grade-distribution histogram over scored entries, one bucket per band of
/// the cohort's scheme (empty bands included).
pub fn grade_histogram(deriveds: &[Option<DerivedMarks>], scheme: GradeScheme) -> Vec<GradeBandCount> {
    scheme
        .bands()
        .iter()
        .map(|band| GradeBandCount {
            grade: band,
            count: deriveds
                .iter()
                .flatten()
                .filter(|d| d.grade == *band)
                .count(),
        })
        .collect()
}
