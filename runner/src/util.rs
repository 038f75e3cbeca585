use std::{
    env, io,
    path::{Component, Path, PathBuf},
};

/// expand `~`, make absolute and lexically remove `.` and `..`
pub fn fully_normalized(path: &Path) -> io::Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir()?.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    Ok(normalized)
}

/// printf style `%e`: six digits after the point, signed exponent with at least two digits
pub fn format_exponent(value: f64) -> String {
    let formatted = format!("{value:.6e}");

    match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => format!(
                "{mantissa}e{}{:02}",
                if exponent < 0 { '-' } else { '+' },
                exponent.abs()
            ),
            Err(_) => formatted,
        },
        // inf and NaN carry no exponent
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::{format_exponent, fully_normalized};
    use std::{env, path::Path};

    #[test]
    fn exponent_matches_printf() {
        assert_eq!(format_exponent(1e10), "1.000000e+10");
        assert_eq!(format_exponent(2.5e-3), "2.500000e-03");
        assert_eq!(format_exponent(0.0), "0.000000e+00");
        assert_eq!(format_exponent(-1.25e123), "-1.250000e+123");
    }

    #[test]
    fn removes_dots_and_parents() {
        assert_eq!(
            fully_normalized(Path::new("/data/./pso-sam/../sam")).unwrap(),
            Path::new("/data/sam")
        );
    }

    #[test]
    fn relative_paths_become_absolute() {
        let normalized = fully_normalized(Path::new("scripts")).unwrap();

        assert!(normalized.is_absolute());
        assert_eq!(normalized, env::current_dir().unwrap().join("scripts"));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = env::var_os("HOME") {
            assert_eq!(
                fully_normalized(Path::new("~/pso-sam/sam")).unwrap(),
                fully_normalized(&Path::new(&home).join("pso-sam/sam")).unwrap()
            );
        }
    }
}
