//! Allele-count tables.
//!
//! Whitespace-delimited text, optionally gzipped. `#` starts a comment.
//! The first row names the populations; each following row is one site
//! with a `red/total` token per population:
//!
//! ```text
//! popA   popB
//! 1/10   0/8
//! 4/10   2/8
//! ```

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::data::{BiallelicData, SitePattern};

fn read_to_string(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read {:?}", path))?;
    Ok(content)
}

/// Sites × populations matrices of red and total allele counts.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCountTable {
    pub labels: Vec<String>,
    pub red: Array2<u32>,
    pub total: Array2<u32>,
}

impl AlleleCountTable {
    pub fn number_of_sites(&self) -> usize {
        self.red.nrows()
    }

    pub fn to_biallelic_data(&self, markers_are_dominant: bool) -> Result<BiallelicData> {
        let mut data = BiallelicData::new(self.labels.clone(), markers_are_dominant)?;
        for (red, total) in self.red.rows().into_iter().zip(self.total.rows()) {
            data.add_site(SitePattern::new(red.to_vec(), total.to_vec()), 1)?;
        }
        Ok(data)
    }
}

fn parse_token(token: &str, line_no: usize) -> Result<(u32, u32)> {
    let Some((r, n)) = token.split_once('/') else {
        bail!("line {line_no}: expected red/total, found {token:?}");
    };
    let r: u32 = r
        .parse()
        .with_context(|| format!("line {line_no}: bad red count in {token:?}"))?;
    let n: u32 = n
        .parse()
        .with_context(|| format!("line {line_no}: bad total count in {token:?}"))?;
    if r > n {
        bail!("line {line_no}: red count exceeds total in {token:?}");
    }
    Ok((r, n))
}

pub fn parse_allele_counts(content: &str) -> Result<AlleleCountTable> {
    let mut labels: Option<Vec<String>> = None;
    let mut red = Vec::new();
    let mut total = Vec::new();
    let mut n_sites = 0usize;
    for (i, raw) in content.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match &labels {
            None => labels = Some(tokens.iter().map(|s| s.to_string()).collect()),
            Some(l) => {
                if tokens.len() != l.len() {
                    bail!(
                        "line {line_no}: {} columns but {} populations",
                        tokens.len(),
                        l.len()
                    );
                }
                for t in tokens {
                    let (r, n) = parse_token(t, line_no)?;
                    red.push(r);
                    total.push(n);
                }
                n_sites += 1;
            }
        }
    }
    let Some(labels) = labels else {
        bail!("allele-count table has no header");
    };
    if n_sites == 0 {
        bail!("allele-count table has no sites");
    }
    let n_pops = labels.len();
    let red = Array2::from_shape_vec((n_sites, n_pops), red).context("failed to shape red counts")?;
    let total =
        Array2::from_shape_vec((n_sites, n_pops), total).context("failed to shape total counts")?;
    Ok(AlleleCountTable { labels, red, total })
}

pub fn read_allele_counts(path: &Path) -> Result<AlleleCountTable> {
    let content = read_to_string(path)?;
    parse_allele_counts(&content).with_context(|| format!("failed to parse {:?}", path))
}
