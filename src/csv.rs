use crate::grading::{self, ComponentMaxima, GradingError, RawMarks, ScoreField};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Two accepted sheet layouts, detected from the header row. The name-keyed
/// layout is what class teachers exchange; the id-keyed one is the stricter
/// supervisor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVariant {
    NameKeyed,
    IdKeyed,
}

impl HeaderVariant {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name_keyed" => Some(Self::NameKeyed),
            "id_keyed" => Some(Self::IdKeyed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NameKeyed => "name_keyed",
            Self::IdKeyed => "id_keyed",
        }
    }

    fn required_headers(&self) -> &'static [&'static str] {
        match self {
            Self::NameKeyed => &["student_name", "test1_score", "test2_score", "exam_score"],
            Self::IdKeyed => &["student_id", "student_name", "test1", "test2", "exam"],
        }
    }

    fn score_header(&self, field: ScoreField) -> &'static str {
        match (self, field) {
            (Self::NameKeyed, ScoreField::Test1) => "test1_score",
            (Self::NameKeyed, ScoreField::Test2) => "test2_score",
            (Self::NameKeyed, ScoreField::Exam) => "exam_score",
            (Self::IdKeyed, ScoreField::Test1) => "test1",
            (Self::IdKeyed, ScoreField::Test2) => "test2",
            (Self::IdKeyed, ScoreField::Exam) => "exam",
        }
    }
}

/// Roster view the reconciler matches rows against.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub student_id: String,
    pub student_no: Option<String>,
    pub name: String,
}

/// One applied update: the matched student's new raw marks.
#[derive(Debug, Clone)]
pub struct RowUpdate {
    pub student_id: String,
    pub marks: RawMarks,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub updates: Vec<RowUpdate>,
    pub errors: Vec<Value>,
    pub warnings: Vec<Value>,
    pub matched_count: usize,
    pub rows_read: usize,
}

struct HeaderMap {
    variant: HeaderVariant,
    by_name: HashMap<String, usize>,
}

impl HeaderMap {
    fn col(&self, header: &str) -> Option<usize> {
        self.by_name.get(header).copied()
    }
}

fn detect_header(line: &str) -> Result<HeaderMap, GradingError> {
    let fields = parse_csv_record(line)
        .into_iter()
        .map(|s| normalize_key(&s))
        .collect::<Vec<_>>();
    let mut by_name = HashMap::<String, usize>::new();
    for (i, f) in fields.iter().enumerate() {
        by_name.insert(f.clone(), i);
    }

    let variant = if by_name.contains_key("student_id") {
        HeaderVariant::IdKeyed
    } else {
        HeaderVariant::NameKeyed
    };

    let missing: Vec<&str> = variant
        .required_headers()
        .iter()
        .filter(|h| !by_name.contains_key(**h))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(GradingError::new(
            "bad_header",
            format!("missing required column(s): {}", missing.join(", ")),
        ));
    }

    Ok(HeaderMap { variant, by_name })
}

/// Reconcile pasted/uploaded CSV text against the roster.
///
/// A malformed header fails the whole import; everything after that is
/// per-row: out-of-range or non-numeric scores reject only their row, and
/// rows with no roster match are reported as warnings, never dropped
/// silently. Blank score cells mean "not entered" and import as such.
pub fn reconcile_import(
    csv_text: &str,
    roster: &[RosterEntry],
    maxima: &ComponentMaxima,
) -> Result<ImportOutcome, GradingError> {
    let lines: Vec<&str> = csv_text.lines().collect();
    if lines.is_empty() || lines[0].trim().is_empty() {
        return Err(GradingError::new("bad_header", "csv text is empty"));
    }
    let header = detect_header(lines[0])?;

    let mut by_student_no = HashMap::<String, &RosterEntry>::new();
    let mut by_name = HashMap::<String, &RosterEntry>::new();
    for entry in roster {
        if let Some(no) = &entry.student_no {
            by_student_no.insert(normalize_key(no), entry);
        }
        by_name.insert(normalize_key(&entry.name), entry);
    }

    let mut outcome = ImportOutcome::default();
    for (line_idx, raw_line) in lines.iter().enumerate().skip(1) {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_idx + 1;
        outcome.rows_read += 1;
        let fields = parse_csv_record(line);

        let cell = |header_name: &str| -> String {
            header
                .col(header_name)
                .and_then(|i| fields.get(i))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let student_name = cell("student_name");
        let matched = match header.variant {
            HeaderVariant::IdKeyed => {
                let no = cell("student_id");
                by_student_no.get(&normalize_key(&no)).copied()
            }
            HeaderVariant::NameKeyed => by_name.get(&normalize_key(&student_name)).copied(),
        };
        let Some(student) = matched else {
            let who = match header.variant {
                HeaderVariant::IdKeyed => cell("student_id"),
                HeaderVariant::NameKeyed => student_name.clone(),
            };
            outcome.warnings.push(json!({
                "line": line_no,
                "code": "unmatched_row",
                "message": format!("no roster match for '{}'", who),
            }));
            continue;
        };

        let mut marks = RawMarks::default();
        let mut row_error: Option<Value> = None;
        for field in [ScoreField::Test1, ScoreField::Test2, ScoreField::Exam] {
            let raw = cell(header.variant.score_header(field));
            if raw.is_empty() {
                // Blank cell: mark never entered, not a zero.
                continue;
            }
            match grading::parse_score(&raw, field, maxima.for_field(field)) {
                Ok(v) => marks.set(field, Some(v)),
                Err(e) => {
                    row_error = Some(json!({
                        "line": line_no,
                        "code": "invalid_score",
                        "message": format!("{}: {}", student.name, e.message),
                    }));
                    break;
                }
            }
        }
        if let Some(e) = row_error {
            outcome.errors.push(e);
            continue;
        }

        outcome.matched_count += 1;
        outcome.updates.push(RowUpdate {
            student_id: student.student_id.clone(),
            marks,
        });
    }

    Ok(outcome)
}

fn score_cell(v: Option<f64>) -> String {
    match v {
        None => String::new(),
        Some(x) if x.fract() == 0.0 => format!("{}", x as i64),
        Some(x) => format!("{}", x),
    }
}

/// One roster member's line in an exported sheet.
#[derive(Debug, Clone)]
pub struct ExportRow {
    pub student_no: Option<String>,
    pub name: String,
    pub marks: RawMarks,
}

/// Emit the cohort as CSV in the requested layout. Derived fields (total,
/// grade, rank) are never exported; unset marks export as blank cells.
pub fn export_csv(rows: &[ExportRow], variant: HeaderVariant) -> String {
    let mut out = String::new();
    match variant {
        HeaderVariant::NameKeyed => {
            out.push_str("student_name,test1_score,test2_score,exam_score\n");
            for r in rows {
                out.push_str(&format!(
                    "{},{},{},{}\n",
                    csv_quote(&r.name),
                    score_cell(r.marks.test1),
                    score_cell(r.marks.test2),
                    score_cell(r.marks.exam)
                ));
            }
        }
        HeaderVariant::IdKeyed => {
            out.push_str("student_id,student_name,test1,test2,exam\n");
            for r in rows {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    csv_quote(r.student_no.as_deref().unwrap_or("")),
                    csv_quote(&r.name),
                    score_cell(r.marks.test1),
                    score_cell(r.marks.test2),
                    score_cell(r.marks.exam)
                ));
            }
        }
    }
    out
}
