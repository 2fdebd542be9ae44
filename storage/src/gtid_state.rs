use std::fs;
use std::io::Write;
use std::path::PathBuf;

use getset::Getters;
use tracing::{debug, error, info, warn};

use common::err::{CResult, Error};

/// Applied-GTID persistence: a single line of ASCII, written atomically via
/// a temp file and rename so a crash never leaves a torn value.
#[derive(Debug, Clone, Getters)]
pub struct GtidStateFile {
    #[getset(get = "pub")]
    path: PathBuf,
}

impl GtidStateFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        GtidStateFile { path: path.into() }
    }

    /// `None` when no state has been recorded yet; an unreadable or empty
    /// file is reported, not silently treated as "start from scratch".
    pub fn read(&self) -> CResult<Option<String>> {
        if !self.exists() {
            debug!(event = "gtid_state", path = %self.path.display(), "state file does not exist");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            error!(event = "gtid_state", path = %self.path.display(), error = %e, "cannot read state file");
            Error::from(e)
        })?;
        let gtid = raw.trim();
        if gtid.is_empty() {
            warn!(event = "gtid_state", path = %self.path.display(), "state file is empty");
            return Err(Error::Corrupt(format!("GTID state file {} is empty", self.path.display())));
        }
        info!(event = "gtid_state", gtid = %gtid, "read applied GTID from state file");
        Ok(Some(gtid.to_string()))
    }

    /// Writes `gtid` + newline to `path.tmp`, flushes and renames over the
    /// target. Parent directories are created on demand.
    pub fn write(&self, gtid: &str) -> CResult<()> {
        if gtid.is_empty() {
            return Err(Error::InvalidInput("cannot write an empty GTID to the state file".to_string()));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        let result = (|| -> CResult<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(gtid.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)?;
            Ok(())
        })();

        if let Err(e) = &result {
            error!(event = "gtid_state", path = %self.path.display(), error = %e, "state file write failed");
            let _ = fs::remove_file(&temp_path);
        } else {
            debug!(event = "gtid_state", gtid = %gtid, "wrote applied GTID");
        }
        result
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn delete(&self) -> CResult<()> {
        if !self.exists() {
            return Ok(());
        }
        fs::remove_file(&self.path)?;
        info!(event = "gtid_state", path = %self.path.display(), "deleted state file");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut os_string = self.path.as_os_str().to_os_string();
        os_string.push(".tmp");
        PathBuf::from(os_string)
    }
}
