//! SKILL.md discovery and frontmatter parsing.
//!
//! Hosts that inject skills into prompts walk a directory tree for
//! `SKILL.md` files. Problems never abort the walk; they are collected
//! as diagnostics.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub file_path: PathBuf,
    pub base_dir: PathBuf,
    pub source: String,
    pub disable_model_invocation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(rename = "type")]
    pub level: DiagnosticLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub skills: Vec<Skill>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn load_from_dir(dir: impl AsRef<Path>) -> LoadResult {
    let mut result = LoadResult::default();
    walk(dir.as_ref(), &mut result);
    result
}

fn walk(dir: &Path, result: &mut LoadResult) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            result.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                message: error.to_string(),
                path: Some(dir.to_path_buf()),
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                result.diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    message: error.to_string(),
                    path: Some(dir.to_path_buf()),
                });
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            walk(&path, result);
            continue;
        }
        let is_skill_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.eq_ignore_ascii_case("SKILL.md"));
        if !is_skill_file {
            continue;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                result.diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    message: error.to_string(),
                    path: Some(path),
                });
                continue;
            }
        };

        let mut skill = parse_skill(&path, content);
        if skill.name.is_empty() {
            result.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warning,
                message: "missing skill name, using directory name".to_string(),
                path: Some(path.clone()),
            });
            skill.name = path
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
        }
        result.skills.push(skill);
    }
}

fn parse_skill(path: &Path, content: String) -> Skill {
    let mut skill = Skill {
        file_path: path.to_path_buf(),
        base_dir: path.parent().unwrap_or(Path::new("")).to_path_buf(),
        source: content.clone(),
        ..Skill::default()
    };

    if !content.starts_with("---\n") {
        return skill;
    }
    let Some((frontmatter, _body)) = content.split_once("\n---\n") else {
        return skill;
    };

    for line in frontmatter.lines() {
        if line == "---" {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"');
        match key.as_str() {
            "name" => skill.name = value.to_string(),
            "description" => skill.description = value.to_string(),
            "disablemodelinvocation" => {
                skill.disable_model_invocation = value.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }
    skill
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, subdir: &str, content: &str) {
        let skill_dir = dir.join(subdir);
        std::fs::create_dir_all(&skill_dir).expect("create skill dir");
        std::fs::write(skill_dir.join("SKILL.md"), content).expect("write skill");
    }

    #[test]
    fn loads_skills_with_frontmatter() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_skill(
            dir.path(),
            "review",
            "---\nname: code-review\ndescription: \"Review changed files\"\ndisableModelInvocation: true\n---\nDo the review.\n",
        );

        let result = load_from_dir(dir.path());
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.skills.len(), 1);
        let skill = &result.skills[0];
        assert_eq!(skill.name, "code-review");
        assert_eq!(skill.description, "Review changed files");
        assert!(skill.disable_model_invocation);
        assert!(skill.source.contains("Do the review."));
    }

    #[test]
    fn missing_names_fall_back_to_the_directory_with_a_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_skill(dir.path(), "refactor", "just a body, no frontmatter\n");

        let result = load_from_dir(dir.path());
        assert_eq!(result.skills.len(), 1);
        assert_eq!(result.skills[0].name, "refactor");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].level, DiagnosticLevel::Warning);
    }

    #[test]
    fn discovery_is_recursive_and_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("create nested");
        std::fs::write(nested.join("skill.md"), "---\nname: nested\n---\nbody\n")
            .expect("write skill");

        let result = load_from_dir(dir.path());
        assert_eq!(result.skills.len(), 1);
        assert_eq!(result.skills[0].name, "nested");
    }

    #[test]
    fn unreadable_roots_become_error_diagnostics() {
        let result = load_from_dir("/definitely/not/a/real/dir");
        assert!(result.skills.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].level, DiagnosticLevel::Error);
    }
}
