use super::results::GalaxyRecord;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Failed to read observations {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?}:{line}: expected `low high value sigma`")]
    Malformed { path: PathBuf, line: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown constraint `{0}`, supported are bh_bulge, hi_massfunc and st_massfunc")]
pub struct UnknownConstraint(pub String);

/// Observable a particle can be scored against.
///
/// The declaration order is the order in which scores are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// black hole mass against bulge mass
    BhBulge,
    /// neutral hydrogen mass function
    HiMassfunc,
    /// stellar mass function
    StMassfunc,
}

/// Which of the two output epochs a constraint is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    First,
    Second,
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BhBulge => "bh_bulge",
            Self::HiMassfunc => "hi_massfunc",
            Self::StMassfunc => "st_massfunc",
        }
    }

    pub fn epoch(&self) -> Epoch {
        match self {
            Self::BhBulge | Self::HiMassfunc => Epoch::First,
            Self::StMassfunc => Epoch::Second,
        }
    }

    pub fn observations(&self, obs_dir: &Path) -> PathBuf {
        obs_dir.join(format!("{}.dat", self.name()))
    }

    /// Score `galaxies` against the observational table in `obs_dir`.
    ///
    /// `volume` is the total simulated volume the galaxies were drawn from.
    /// `None` means there was not enough data to say anything.
    pub fn score(
        &self,
        galaxies: &[GalaxyRecord],
        obs_dir: &Path,
        volume: f64,
    ) -> Result<Option<Probability>, ScoreError> {
        let path = self.observations(obs_dir);
        let Some(observed) = read_observations(&path)? else {
            warn!(constraint = self.name(), path = ?path, "No observations, skipping constraint");
            return Ok(None);
        };

        let model = match self {
            Self::BhBulge => binned_mean(
                galaxies
                    .iter()
                    .filter(|galaxy| galaxy.bulge_mass > 0.0 && galaxy.bh_mass > 0.0)
                    .map(|galaxy| (galaxy.bulge_mass.log10(), galaxy.bh_mass.log10())),
                &observed,
            ),
            Self::HiMassfunc => mass_function(
                galaxies.iter().map(|galaxy| galaxy.hi_mass),
                &observed,
                volume,
            ),
            Self::StMassfunc => mass_function(
                galaxies.iter().map(|galaxy| galaxy.stellar_mass),
                &observed,
                volume,
            ),
        };

        let (chi2, bins) = observed
            .iter()
            .zip(model)
            .filter_map(|(bin, model)| {
                model
                    .filter(|_| bin.sigma > 0.0)
                    .map(|model| ((model - bin.value) / bin.sigma).powi(2))
            })
            .fold((0.0, 0), |(chi2, bins), term| (chi2 + term, bins + 1));

        if bins == 0 {
            debug!(constraint = self.name(), "No overlap between model and observations");
            return Ok(None);
        }

        Ok(Some(Probability {
            constraint: *self,
            value: (-chi2 / 2.0).exp(),
            bins,
        }))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Constraint {
    type Err = UnknownConstraint;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "bh_bulge" => Ok(Self::BhBulge),
            "hi_massfunc" => Ok(Self::HiMassfunc),
            "st_massfunc" => Ok(Self::StMassfunc),
            other => Err(UnknownConstraint(other.to_owned())),
        }
    }
}

/// parse a comma separated list of constraint names, blanks are ignored
pub fn parse_constraints(list: &str) -> Result<BTreeSet<Constraint>, UnknownConstraint> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Constraint::from_str)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probability {
    pub constraint: Constraint,
    pub value: f64,
    /// number of observational bins that contributed
    pub bins: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ObservedBin {
    low: f64,
    high: f64,
    value: f64,
    sigma: f64,
}

impl ObservedBin {
    fn contains(&self, x: f64) -> bool {
        self.low <= x && x < self.high
    }
}

fn read_observations(path: &Path) -> Result<Option<Vec<ObservedBin>>, ScoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ScoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut bins = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let malformed = || ScoreError::Malformed {
            path: path.to_path_buf(),
            line: index + 1,
        };
        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed())?;

        match values[..] {
            [low, high, value, sigma] if low < high => bins.push(ObservedBin {
                low,
                high,
                value,
                sigma,
            }),
            _ => return Err(malformed()),
        }
    }

    Ok(if bins.is_empty() { None } else { Some(bins) })
}

/// log10 of the number density per dex of `masses` in every observed bin
fn mass_function(
    masses: impl Iterator<Item = f64>,
    observed: &[ObservedBin],
    volume: f64,
) -> Vec<Option<f64>> {
    let mut counts = vec![0usize; observed.len()];

    for log_mass in masses.filter(|mass| *mass > 0.0).map(f64::log10) {
        if let Some(index) = observed.iter().position(|bin| bin.contains(log_mass)) {
            counts[index] += 1;
        }
    }

    observed
        .iter()
        .zip(counts)
        .map(|(bin, count)| {
            (count > 0 && volume > 0.0)
                .then(|| (count as f64 / (volume * (bin.high - bin.low))).log10())
        })
        .collect()
}

/// mean of y for every observed bin in x
fn binned_mean(points: impl Iterator<Item = (f64, f64)>, observed: &[ObservedBin]) -> Vec<Option<f64>> {
    let mut sums = vec![(0.0, 0usize); observed.len()];

    for (x, y) in points {
        if let Some(index) = observed.iter().position(|bin| bin.contains(x)) {
            sums[index].0 += y;
            sums[index].1 += 1;
        }
    }

    sums.into_iter()
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect()
}
