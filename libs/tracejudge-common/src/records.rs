// JSONL record files consumed and produced by the evaluation tooling
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::types::{Problem, ResponseRecord};

/// Read every non-blank line of a JSONL file as a response record
pub fn read_records(path: &Path) -> Result<Vec<ResponseRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: ResponseRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid response record", path.display(), idx + 1))?;
        records.push(record);
    }

    Ok(records)
}

/// Replace `path` with one JSON object per record
pub fn write_records(path: &Path, records: &[ResponseRecord]) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    for record in records {
        writer.append(record)?;
    }
    Ok(())
}

/// Line-at-a-time JSONL writer, flushed after every record so a partial
/// run leaves a readable file behind
pub struct RecordWriter {
    inner: BufWriter<File>,
    written: usize,
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        Ok(Self {
            inner: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, record: &ResponseRecord) -> Result<()> {
        serde_json::to_writer(&mut self.inner, record).context("Failed to serialize record")?;
        self.inner.write_all(b"\n")?;
        self.inner.flush().context("Failed to flush record")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// Rewrite a JSONL file as a pretty-printed JSON array for the web UI
pub fn convert_jsonl_to_json(input: &Path, output: &Path) -> Result<usize> {
    let values = read_json_lines(input)?;

    let rendered = serde_json::to_string_pretty(&values).context("Failed to serialize responses")?;
    fs::write(output, rendered).with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(values.len())
}

/// Drop records whose trace is blank. Kept lines are written back verbatim.
///
/// Returns `(kept, removed)`.
pub fn prune_blank(input: &Path, output: &Path) -> Result<(usize, usize)> {
    let content =
        fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let mut kept = Vec::new();
    let mut removed = 0;
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", input.display(), idx + 1))?;
        let blank = value
            .get("trace")
            .and_then(|t| t.as_str())
            .map_or(true, |t| t.trim().is_empty());

        if blank {
            removed += 1;
        } else {
            kept.push(line);
        }
    }

    let mut rendered = kept.join("\n");
    if !rendered.is_empty() {
        rendered.push('\n');
    }
    fs::write(output, rendered).with_context(|| format!("Failed to write {}", output.display()))?;

    Ok((kept.len(), removed))
}

/// Load the problem metadata exported for the annotation UI (a JSON array)
pub fn load_problems(path: &Path) -> Result<Vec<Problem>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Key problems by numeric id. Problems with a non-numeric id are skipped.
pub fn index_problems(problems: Vec<Problem>) -> HashMap<u64, Problem> {
    let mut index = HashMap::with_capacity(problems.len());
    for problem in problems {
        match problem.problem_id.trim().parse::<u64>() {
            Ok(id) => {
                index.insert(id, problem);
            }
            Err(_) => {
                tracing::warn!(problem_id = %problem.problem_id, "Skipping problem with non-numeric id");
            }
        }
    }
    index
}

fn read_json_lines(path: &Path) -> Result<Vec<serde_json::Value>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line.trim())
                .with_context(|| format!("{}:{}: invalid JSON", path.display(), idx + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Persona, Verdict};

    const SAMPLE: &str = concat!(
        r#"{"id":"a","problem_id":1,"type":"naive","trace":"code","inputs":["1"],"expected_outputs":["1"],"generated_outputs":["1"]}"#,
        "\n\n",
        r#"{"id":"b","problem_id":"2","type":"reasoning","trace":"","inputs":[],"expected_outputs":[],"generated_outputs":[]}"#,
        "\n",
        r#"{"id":"c","problem_id":3,"type":"reasoning","trace":"   ","inputs":[],"expected_outputs":[],"generated_outputs":[],"note":"x"}"#,
        "\n"
    );

    fn sample_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("responses.jsonl");
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_read_records_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(&sample_file(&dir)).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].problem_id, 2);
        assert_eq!(records[1].persona, Persona::Reasoning);
    }

    #[test]
    fn test_read_records_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"id\":\"a\"}\n").unwrap();

        let err = read_records(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.jsonl:1"));
    }

    #[test]
    fn test_write_then_read_keeps_verdicts_and_extra() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = read_records(&sample_file(&dir)).unwrap();
        records[0].verdicts = Some(vec![Some(Verdict::Pass), None]);

        let out = dir.path().join("nested/out.jsonl");
        write_records(&out, &records).unwrap();

        let back = read_records(&out).unwrap();
        assert_eq!(back, records);
        assert_eq!(back[2].extra.get("note").unwrap(), "x");
    }

    #[test]
    fn test_convert_jsonl_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("responses.json");

        let count = convert_jsonl_to_json(&sample_file(&dir), &out).unwrap();
        assert_eq!(count, 3);

        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed[2]["note"], "x");
    }

    #[test]
    fn test_prune_blank_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_file(&dir);

        let (kept, removed) = prune_blank(&path, &path).unwrap();
        assert_eq!((kept, removed), (1, 2));

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }

    #[test]
    fn test_index_problems_skips_non_numeric_ids() {
        let problems = vec![
            Problem {
                problem_id: "4".into(),
                difficulty: "B".into(),
                ..Default::default()
            },
            Problem {
                problem_id: "abc".into(),
                ..Default::default()
            },
        ];

        let index = index_problems(problems);
        assert_eq!(index.len(), 1);
        assert_eq!(index[&4].difficulty, "B");
    }
}
