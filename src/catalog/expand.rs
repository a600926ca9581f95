//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Variable expansion for `command` and `log`: first a restricted
//! `$(date ...)` substitution that shells out to `/bin/date` directly
//! (safe-split, never through a shell), then plain `$VAR`/`${VAR}`
//! expansion against the process environment.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

/// Matches the literal substring `$(date ...)` up to its closing paren.
/// Mirrors the Python regex `\$\((date.*)\)`, which is greedy and therefore
/// consumes up to the *last* `)` on the line — reproduced here with a
/// greedy `.*` for the same behavior.
fn date_pattern() -> Regex {
    Regex::new(r"\$\((date.*)\)").expect("static regex is valid")
}

pub fn expand(value: &str) -> Result<String> {
    let with_date = expand_date(value)?;
    Ok(shellexpand::full(&with_date)
        .map(|cow| cow.into_owned())
        .unwrap_or(with_date))
}

fn expand_date(value: &str) -> Result<String> {
    let pattern = date_pattern();
    let Some(caps) = pattern.captures(value) else {
        return Ok(value.to_string());
    };

    let whole_match = caps.get(0).expect("group 0 always present").as_str();
    let inner = caps.get(1).expect("capture group 1 matched").as_str();

    let args = shell_words::split(inner)
        .with_context(|| format!("Tokenizing date arguments: {}", inner))?;
    let mut args = args.into_iter();
    let _leading_date_token = args.next(); // the literal word "date"

    let output = Command::new("/bin/date")
        .args(args)
        .output()
        .context("Invoking /bin/date for command-substitution expansion")?;

    if !output.status.success() {
        return Err(anyhow!(
            "/bin/date exited with status {:?}",
            output.status.code()
        ));
    }

    let stdout = String::from_utf8(output.stdout).context("/bin/date output was not UTF-8")?;
    let first_line = stdout.lines().next().unwrap_or("");

    Ok(value.replacen(whole_match, first_line, 1))
}

/// Resolve the effective log path for a task, applying the
/// directory-means-append-a-file rule.
pub fn resolve_log_path(expanded: &str, task_name: &str) -> PathBuf {
    let path = Path::new(expanded);
    if path.is_dir() {
        path.join(format!("{}.log", lower_with_underscores(task_name)))
    } else {
        path.to_path_buf()
    }
}

pub fn lower_with_underscores(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn expands_plain_env_var() {
        env::set_var("ANGORA_TEST_X", "a");
        let out = expand("${ANGORA_TEST_X} literal").unwrap();
        assert_eq!(out, "a literal");
    }

    #[test]
    fn expands_date_substitution() {
        let out = expand("$(date +%Y)").unwrap();
        let year = chrono::Local::now().format("%Y").to_string();
        assert_eq!(out, year);
    }

    #[test]
    fn combines_env_and_date() {
        env::set_var("ANGORA_TEST_X", "a");
        let out = expand("${ANGORA_TEST_X} $(date +%Y)").unwrap();
        let year = chrono::Local::now().format("%Y").to_string();
        assert_eq!(out, format!("a {}", year));
    }

    #[test]
    fn directory_log_path_gets_task_file_name() {
        let dir = std::env::temp_dir();
        let resolved = resolve_log_path(dir.to_str().unwrap(), "My Job");
        assert_eq!(resolved.file_name().unwrap().to_str().unwrap(), "my_job.log");
    }

    #[test]
    fn lowercases_and_replaces_spaces() {
        assert_eq!(lower_with_underscores("My Job"), "my_job");
    }
}
