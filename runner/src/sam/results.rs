use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    num::ParseFloatError,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultError {
    #[error("Failed to read result file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?}:{line}: expected 4 columns, found {found}")]
    Arity {
        path: PathBuf,
        line: usize,
        found: usize,
    },
    #[error("{path:?}:{line}: {source}")]
    Number {
        path: PathBuf,
        line: usize,
        #[source]
        source: ParseFloatError,
    },
}

/// One row of a calibration catalogue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalaxyRecord {
    pub stellar_mass: f64,
    pub bulge_mass: f64,
    pub bh_mass: f64,
    pub hi_mass: f64,
}

/// Read a catalogue: one header line, then whitespace separated rows
pub fn read_catalogue(path: &Path) -> Result<Vec<GalaxyRecord>, ResultError> {
    let io_error = |source| ResultError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut galaxies = Vec::new();

    for (index, line) in reader.lines().enumerate().skip(1) {
        let line = line.map_err(io_error)?;

        if line.trim().is_empty() {
            continue;
        }

        galaxies.push(parse_record(&line).map_err(|error| error.at(path, index + 1))?);
    }

    Ok(galaxies)
}

enum RowError {
    Arity(usize),
    Number(ParseFloatError),
}

impl RowError {
    fn at(self, path: &Path, line: usize) -> ResultError {
        let path = path.to_path_buf();

        match self {
            Self::Arity(found) => ResultError::Arity { path, line, found },
            Self::Number(source) => ResultError::Number { path, line, source },
        }
    }
}

fn parse_record(line: &str) -> Result<GalaxyRecord, RowError> {
    let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(RowError::Number)?;

    match values[..] {
        [stellar_mass, bulge_mass, bh_mass, hi_mass] => Ok(GalaxyRecord {
            stellar_mass,
            bulge_mass,
            bh_mass,
            hi_mass,
        }),
        _ => Err(RowError::Arity(values.len())),
    }
}
