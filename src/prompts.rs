//! System prompt for the homepage assistant.

use std::fs;
use std::path::Path;

use crate::logging;

// Prompt text compiled into the binary
pub const BASE_PROMPT: &str = include_str!("prompts/base.txt");

/// Build the full system prompt, appending the optional background file.
///
/// A missing, unreadable, or empty file leaves the base prompt unchanged.
#[must_use]
pub fn build_system_prompt(background_path: &Path) -> String {
    let base = BASE_PROMPT.trim_end();
    match load_background(background_path) {
        Some(extra) => with_background(base, &extra),
        None => base.to_string(),
    }
}

fn load_background(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                logging::info(format!("Loaded background information from {}", path.display()));
                Some(trimmed.to_string())
            }
        }
        Err(err) => {
            logging::warn(format!(
                "Could not load background information from {}: {err}",
                path.display()
            ));
            None
        }
    }
}

fn with_background(base: &str, extra: &str) -> String {
    format!(
        "{base}\n\n## Additional Background Information\n\n\
         The following is additional detailed information about Dingkang \
         that you can reference:\n\n{extra}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "homepage-chat-prompts-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("resume.md");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_base_prompt() {
        let prompt = build_system_prompt(Path::new("/definitely/not/here/resume.md"));
        assert_eq!(prompt, BASE_PROMPT.trim_end());
        assert!(prompt.starts_with("You are an AI assistant on Dingkang Wang's personal homepage."));
    }

    #[test]
    fn background_file_is_appended() {
        let path = temp_file("append", "\n\nPublished three papers on radar perception.\n");
        let prompt = build_system_prompt(&path);
        assert!(prompt.starts_with(BASE_PROMPT.trim_end()));
        assert!(prompt.contains("## Additional Background Information"));
        assert!(prompt.ends_with("Published three papers on radar perception.\n"));
    }

    #[test]
    fn blank_file_is_ignored() {
        let path = temp_file("blank", "   \n\t\n");
        assert_eq!(build_system_prompt(&path), BASE_PROMPT.trim_end());
    }
}
