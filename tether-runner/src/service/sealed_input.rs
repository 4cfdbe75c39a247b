//! Sealed input materialisation
//!
//! Opens a job's sealed envelope with the runner's keyring and hands the
//! plaintext to the command in exactly one way:
//!
//! - `{{sealed_input_file}}` in an argument is replaced by the path of a
//!   0600 temp file holding the plaintext;
//! - an argument containing `{{sealed_input_stdin}}` is removed and the
//!   plaintext is piped to stdin;
//! - with neither placeholder the temp file path is exported as
//!   `TETHER_SEALED_INPUT_FILE`.
//!
//! Files and environment stay on the runner host, so ssh jobs may only
//! take their sealed input over stdin.
//!
//! The AAD is rebuilt from the job record, so an envelope copied from
//! another job fails to open. Every string leaf of the plaintext is
//! registered with the run's redactor before any output is produced.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tether_core::domain::job::Job;
use tether_core::domain::kind::JobKind;
use tether_envelope::{ALGORITHM, Aad, EnvelopeError, Keyring, open_json};

use super::redact::Redactor;

pub const FILE_PLACEHOLDER: &str = "{{sealed_input_file}}";
pub const STDIN_PLACEHOLDER: &str = "{{sealed_input_stdin}}";
pub const FILE_ENV_VAR: &str = "TETHER_SEALED_INPUT_FILE";

const TEMP_PREFIX: &str = "tether-input-";

#[derive(Debug, thiserror::Error)]
pub enum SealedInputError {
    /// The job's arguments or sealed input are inconsistent
    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("failed to write sealed input file: {0}")]
    Io(#[from] std::io::Error),
}

/// How the arguments ask for the plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    None,
    File,
    Stdin,
}

/// Finds the single placeholder in `args`, rejecting duplicates and mixes.
pub fn scan_placeholders(args: &[String]) -> Result<Placeholder, SealedInputError> {
    let count = |needle: &str| -> usize { args.iter().map(|a| a.matches(needle).count()).sum() };
    let files = count(FILE_PLACEHOLDER);
    let stdins = count(STDIN_PLACEHOLDER);

    match (files, stdins) {
        (0, 0) => Ok(Placeholder::None),
        (1, 0) => Ok(Placeholder::File),
        (0, 1) => Ok(Placeholder::Stdin),
        (f, s) if f > 0 && s > 0 => Err(SealedInputError::Protocol(
            "arguments reference both sealed input file and stdin".to_string(),
        )),
        _ => Err(SealedInputError::Protocol(
            "sealed input placeholder may appear only once".to_string(),
        )),
    }
}

/// Plaintext made available to one execution. Dropping it removes the file.
#[derive(Debug)]
pub struct MaterializedInput {
    file: Option<NamedTempFile>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl MaterializedInput {
    fn passthrough(args: Vec<String>) -> Self {
        Self {
            file: None,
            args,
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }
}

/// Resolves `job`'s arguments against its sealed input, if any.
pub fn materialize(
    job: &Job,
    keyring: &Keyring,
    work_dir: &Path,
    redactor: &mut Redactor,
) -> Result<MaterializedInput, SealedInputError> {
    let placeholder = scan_placeholders(&job.args)?;

    let Some(sealed) = &job.sealed_input else {
        if placeholder != Placeholder::None {
            return Err(SealedInputError::Protocol(
                "arguments reference sealed input but the job carries none".to_string(),
            ));
        }
        return Ok(MaterializedInput::passthrough(job.args.clone()));
    };

    if job.kind == JobKind::Ssh && placeholder != Placeholder::Stdin {
        return Err(SealedInputError::Protocol(format!(
            "ssh jobs must pass sealed input via {}",
            STDIN_PLACEHOLDER
        )));
    }

    if sealed.sealed_input_alg != ALGORITHM {
        return Err(SealedInputError::Protocol(format!(
            "unsupported sealed input algorithm {}",
            sealed.sealed_input_alg
        )));
    }
    let target = job.target_runner_id.as_deref().ok_or_else(|| {
        SealedInputError::Protocol("sealed input on a job without a target runner".to_string())
    })?;

    let aad = Aad::job(&job.project_id, job.id, job.kind, target)?;
    let value = open_json(
        &sealed.sealed_input_b64,
        keyring,
        &aad,
        &sealed.sealed_input_key_id,
    )?;
    redactor.add_json_leaves(&value);
    let plaintext = serde_json::to_vec(&value).map_err(|_| EnvelopeError::InvalidPayload)?;

    tracing::debug!(
        "Opened sealed input for job {} ({} bytes, key {})",
        job.id,
        plaintext.len(),
        sealed.sealed_input_key_id
    );

    match placeholder {
        Placeholder::Stdin => Ok(MaterializedInput {
            file: None,
            args: job
                .args
                .iter()
                .filter(|a| !a.contains(STDIN_PLACEHOLDER))
                .cloned()
                .collect(),
            env: Vec::new(),
            stdin: Some(plaintext),
        }),
        Placeholder::File => {
            let file = write_temp(work_dir, &plaintext)?;
            let path = file.path().display().to_string();
            Ok(MaterializedInput {
                args: job
                    .args
                    .iter()
                    .map(|a| a.replace(FILE_PLACEHOLDER, &path))
                    .collect(),
                file: Some(file),
                env: Vec::new(),
                stdin: None,
            })
        }
        Placeholder::None => {
            let file = write_temp(work_dir, &plaintext)?;
            let path = file.path().display().to_string();
            Ok(MaterializedInput {
                file: Some(file),
                args: job.args.clone(),
                env: vec![(FILE_ENV_VAR.to_string(), path)],
                stdin: None,
            })
        }
    }
}

fn write_temp(work_dir: &Path, plaintext: &[u8]) -> Result<NamedTempFile, SealedInputError> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".json")
        .tempfile_in(work_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(plaintext)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Removes sealed input files left behind by a previous crash.
pub fn sweep_stale(work_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for entry in std::fs::read_dir(work_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(TEMP_PREFIX) || !entry.file_type()?.is_file() {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        removed.push(entry.path());
    }

    Ok(removed)
}
