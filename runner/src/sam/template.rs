use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read base configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write configuration {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn load(path: &Path) -> Result<String, TemplateError> {
    fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn store(path: &Path, contents: &str) -> Result<(), TemplateError> {
    fs::write(path, contents).map_err(|source| TemplateError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace every line assigning `name` (`name = ...`, whitespace before `=`
/// tolerated) with `name = value`. All other lines are kept byte for byte.
pub fn substitute(template: &str, name: &str, value: &str) -> String {
    let mut result = String::with_capacity(template.len());

    for line in template.split_inclusive('\n') {
        let (content, terminator) = match line.strip_suffix('\n') {
            Some(content) => (content, "\n"),
            None => (line, ""),
        };

        if assigns(content, name) {
            result.push_str(name);
            result.push_str(" = ");
            result.push_str(value);
            result.push_str(terminator);
        } else {
            result.push_str(line);
        }
    }

    result
}

/// Apply `substitute` for each pair in order, later pairs win over earlier ones
pub fn substitute_all<'a, I>(template: &str, assignments: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    assignments
        .into_iter()
        .fold(template.to_owned(), |config, (name, value)| {
            substitute(&config, name, &value)
        })
}

fn assigns(line: &str, name: &str) -> bool {
    !name.is_empty()
        && line
            .strip_prefix(name)
            .map(|rest| rest.trim_start().starts_with('='))
            .unwrap_or(false)
}
