use crate::mat_util::*;
use crate::{Assignment, Error, Index, IndexValueVec, Result, SparseMat};
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use time;

/// Parse a line of predicted scores for one instance.
///
/// The line should be in the following format:
/// label1:score1 label2:score2 ... labelm:scorem
///
/// Pairs may come in any order; labels must not repeat. An empty line is an instance without
/// any non-zero score.
fn parse_prediction_line(line: &str) -> Result<IndexValueVec> {
    let mut pairs = IndexValueVec::new();
    for pair_str in line.split_whitespace() {
        let mut pair_iter = pair_str.split(':');
        let label = pair_iter
            .next()
            .and_then(|s| s.parse::<Index>().ok())
            .ok_or_else(|| Error::Parse(format!("label in \"{}\"", pair_str)))?;
        let score = pair_iter
            .next()
            .and_then(|s| s.parse::<f32>().ok())
            .filter(|s| s.is_finite())
            .ok_or_else(|| Error::Parse(format!("score in \"{}\"", pair_str)))?;
        if pair_iter.next().is_some() {
            return Err(Error::Parse(format!("label-score pair \"{}\"", pair_str)));
        }
        pairs.push((label, score));
    }
    pairs.sort_by_index();
    Ok(pairs)
}

/// Load predicted scores into a CSR matrix, one instance per line.
///
/// If `n_labels` is not given, it is taken to be one more than the largest label seen.
pub fn load_sparse_predictions<P: AsRef<Path>>(
    path: P,
    n_labels: Option<usize>,
) -> Result<SparseMat> {
    let path = path.as_ref();
    info!("Loading predictions from {}", path.display());
    let start_t = time::precise_time_s();

    let file_content = fs::read_to_string(path)?;
    let rows = file_content
        .par_lines()
        .map(parse_prediction_line)
        .collect::<Result<Vec<_>>>()?;

    let n_labels = n_labels.unwrap_or_else(|| {
        rows.iter()
            .filter_map(|row| row.last())
            .map(|&(label, _)| label as usize + 1)
            .max()
            .unwrap_or(0)
    });
    if let Some(i) = rows.iter().position(|row| !row.is_valid_sparse_vec(n_labels)) {
        return Err(Error::Parse(format!(
            "line {}: labels must be distinct and smaller than {}",
            i + 1,
            n_labels
        )));
    }

    let mat = rows.copy_to_csrmat(n_labels);
    info!(
        "Loaded {} instances with {} labels and {} non-zero scores; it took {:.2}s",
        mat.rows(),
        n_labels,
        mat.nnz(),
        time::precise_time_s() - start_t
    );
    Ok(mat)
}

/// Parse the label list at the start of a line from the Extreme Classification Repository.
///
/// The line should be in the following format:
/// label1,label2,...labelk ft1:ft1_val ft2:ft2_val ft3:ft3_val .. ftd:ftd_val
///
/// Features are skipped.
fn parse_xc_repo_labels(line: &str, n_labels: usize) -> Result<Vec<Index>> {
    let labels_str = line.split(' ').next().unwrap_or("");
    let mut labels = Vec::new();
    for label_str in labels_str.split(',') {
        if label_str.is_empty() || label_str.contains(':') {
            continue;
        }
        let label = label_str
            .parse::<Index>()
            .map_err(|_| Error::Parse(format!("label {} in line \"{}\"", label_str, line)))?;
        if label as usize >= n_labels {
            return Err(Error::Parse(format!(
                "label {} is out of range in line \"{}\"",
                label, line
            )));
        }
        labels.push(label);
    }
    labels.sort_unstable();
    labels.dedup();
    Ok(labels)
}

fn parse_header_token(token: &str, what: &str) -> Result<usize> {
    token
        .parse::<usize>()
        .map_err(|_| Error::Parse(format!("number of {} in header", what)))
}

/// Count how often each label occurs in a data file from the Extreme Classification Repository.
///
/// Returns the per-label counts and the number of examples; these feed the label marginals and
/// propensity models in [`crate::weights`].
pub fn load_label_counts<P: AsRef<Path>>(path: P) -> Result<(Vec<usize>, usize)> {
    let path = path.as_ref();
    info!("Loading label counts from {}", path.display());
    let start_t = time::precise_time_s();

    let file_content = fs::read_to_string(path)?;
    let lines: Vec<&str> = file_content.par_lines().collect();
    let (n_examples, n_labels) = {
        let header = lines.first().copied().unwrap_or("");
        let tokens = header.split_whitespace().collect_vec();
        if tokens.len() != 3 {
            return Err(Error::Parse(format!(
                "header line; expected 3 space-separated tokens, found {}",
                tokens.len()
            )));
        }
        let n_examples = parse_header_token(tokens[0], "examples")?;
        parse_header_token(tokens[1], "features")?;
        let n_labels = parse_header_token(tokens[2], "labels")?;
        (n_examples, n_labels)
    };

    let label_lists = lines
        .into_par_iter()
        .skip(1)
        .map(|line| parse_xc_repo_labels(line, n_labels))
        .collect::<Result<Vec<_>>>()?;
    if n_examples != label_lists.len() {
        return Err(Error::Parse(format!(
            "data file; expected {} examples, but read {}",
            n_examples,
            label_lists.len()
        )));
    }

    let mut counts = vec![0usize; n_labels];
    for &label in label_lists.iter().flatten() {
        counts[label as usize] += 1;
    }

    info!(
        "Loaded label counts of {} examples; it took {:.2}s",
        n_examples,
        time::precise_time_s() - start_t
    );
    Ok((counts, n_examples))
}

/// Write an assignment with one line of space-separated labels per instance.
pub fn write_assignment<W: Write>(writer: &mut W, assignment: &Assignment) -> Result<()> {
    for labels in assignment.rows() {
        writeln!(writer, "{}", labels.iter().join(" "))?;
    }
    Ok(())
}

/// Write an assignment to a file; see [`write_assignment`].
pub fn save_assignment<P: AsRef<Path>>(path: P, assignment: &Assignment) -> Result<()> {
    let path = path.as_ref();
    info!("Saving assignment to {}", path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    write_assignment(&mut writer, assignment)?;
    writer.flush()?;
    Ok(())
}
