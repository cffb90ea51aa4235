use crate::error::InputError;
use crate::models::InputRow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Column positions resolved from the header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnIndex {
    lesson_name: usize,
    question: usize,
    answer_id: usize,
    answer: usize,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, InputError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(InputError::MissingColumn(name))
        };

        Ok(Self {
            lesson_name: find("lesson_name")?,
            question: find("question")?,
            answer_id: find("answer_id")?,
            answer: find("answer")?,
        })
    }
}

/// `<base>.csv`, the way pipelines name their input
pub fn input_path(base: &str) -> PathBuf {
    PathBuf::from(format!("{base}.csv"))
}

/// Read every data row of `path` before any grading starts
pub fn load_rows(path: &Path) -> Result<Vec<InputRow>, InputError> {
    let file = File::open(path).map_err(|e| InputError::Read {
        path: path.display().to_string(),
        source: e.into(),
    })?;
    read_rows_from(file)
}

/// Same as [`load_rows`] for an in-memory or already opened source
pub fn read_rows_from<R: Read>(source: R) -> Result<Vec<InputRow>, InputError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);
    let columns = ColumnIndex::resolve(reader.headers()?)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        // short rows are tolerated; absent cells read as empty
        let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        rows.push(InputRow {
            lesson_name: cell(columns.lesson_name),
            question: cell(columns.question),
            answer_id: cell(columns.answer_id),
            answer: cell(columns.answer),
        });
    }

    Ok(rows)
}
