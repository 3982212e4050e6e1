use crate::constants::keys;
use crate::services::job_spec::JobSpec;
use crate::utils::text::last_path_segment;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder regex"));

/// Short file name on the execution host mapped to the source path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileTable {
    entries: BTreeMap<String, String>,
}

impl FileTable {
    pub fn insert(&mut self, short_name: String, full_path: String) {
        self.entries.insert(short_name, full_path);
    }

    pub fn get(&self, short_name: &str) -> Option<&str> {
        self.entries.get(short_name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPlan {
    /// Resolved command before it was split into stages.
    pub command: String,
    pub stages: Vec<String>,
}

impl CommandPlan {
    /// Builds the stage list. `working_dir` is what `${workingDir}` resolves to
    /// on the execution host.
    pub fn build(spec: &JobSpec, working_dir: &str) -> (CommandPlan, FileTable) {
        let mut template = spec.executable.clone();
        if spec.append_input && spec.params.contains_key(keys::INPUT_FILE) {
            template.push_str(" ${inputFile}");
        }

        let mut files = FileTable::default();
        let mut short_names: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in spec.params.iter() {
            if !key.to_lowercase().ends_with("file") {
                continue;
            }
            let short = last_path_segment(value.trim()).to_string();
            if short.is_empty() {
                continue;
            }
            files.insert(short.clone(), value.trim().to_string());
            short_names.insert(key.to_lowercase(), short);
        }

        let install_dir = spec.install_dir.as_deref().map(with_trailing_separator);

        let resolved = PLACEHOLDER.replace_all(&template, |caps: &Captures| {
            let raw_key = &caps[1];
            let key = raw_key.trim().to_lowercase();
            if let Some(short) = short_names.get(&key) {
                return short.clone();
            }
            match key.as_str() {
                "installdir" if install_dir.is_some() => {
                    install_dir.clone().unwrap_or_default()
                }
                "workingdir" => working_dir.to_string(),
                _ => spec
                    .params
                    .get(raw_key)
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        });

        let mut command = resolved.into_owned();
        if spec.num_procs > 1 {
            let launcher = if spec.is_designated_host() {
                "aprun"
            } else {
                "mpiexec"
            };
            command = format!("{} -n {} {}", launcher, spec.num_procs, command);
        }
        if spec.num_tbb_threads > 1 {
            command = format!("{} --n-threads={}", command, spec.num_tbb_threads);
        }
        let command = command.trim().to_string();

        let stages = command
            .split(';')
            .map(str::trim)
            .filter(|stage| !stage.is_empty())
            .map(str::to_string)
            .collect();

        (CommandPlan { command, stages }, files)
    }
}

fn with_trailing_separator(dir: &str) -> String {
    let separator = if dir.contains(":\\") { '\\' } else { '/' };
    if dir.ends_with(separator) {
        dir.to_string()
    } else {
        format!("{}{}", dir, separator)
    }
}
