pub mod records;
pub mod renderer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sequencer::SequenceBank;
use crate::settings::Settings;
use crate::synth::wavetable::WAVE_SAMPLES;
use crate::synth::{Patch, WaveTable};

use records::{BANK_FIELDS, PATCH_FIELDS, SETTINGS_FIELDS};

const PATCH_EXTENSION: &str = "patch";
const BANK_EXTENSION: &str = "seq";
const SETTINGS_FILE: &str = "prefs.set";

/// Everything a patch record holds: the synth parameters and the three
/// user wavetables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
    pub patch: Patch,
    #[serde(with = "user_tables")]
    pub user_tables: [WaveTable; 3],
}

impl Default for PatchData {
    fn default() -> Self {
        Self {
            patch: Patch::default(),
            user_tables: [[0; WAVE_SAMPLES]; 3],
        }
    }
}

/// serde only derives arrays up to 32 elements; tables go through Vec
mod user_tables {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::synth::wavetable::WAVE_SAMPLES;
    use crate::synth::WaveTable;

    pub fn serialize<S: Serializer>(tables: &[WaveTable; 3], s: S) -> Result<S::Ok, S::Error> {
        let v: Vec<&[u16]> = tables.iter().map(|t| &t[..]).collect();
        v.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[WaveTable; 3], D::Error> {
        let v: Vec<Vec<u16>> = Vec::deserialize(d)?;
        let mut tables = [[0u16; WAVE_SAMPLES]; 3];
        if v.len() != tables.len() {
            return Err(D::Error::custom("expected 3 user tables"));
        }
        for (table, samples) in tables.iter_mut().zip(&v) {
            if samples.len() != WAVE_SAMPLES {
                return Err(D::Error::custom(format!(
                    "user table needs {} samples, got {}",
                    WAVE_SAMPLES,
                    samples.len()
                )));
            }
            table.copy_from_slice(samples);
        }
        Ok(tables)
    }
}

/// Persistent storage for patch, bank and settings records.
///
/// `Err` means the store itself failed (missing card, unreadable file);
/// `Ok(None)` means a record was found but too short to use.
pub trait ParameterStore {
    fn load_patch(&self, name: &str) -> Result<Option<PatchData>>;
    fn save_patch(&self, name: &str, data: &PatchData) -> Result<()>;
    fn load_bank(&self, name: &str) -> Result<Option<SequenceBank>>;
    fn save_bank(&self, name: &str, bank: &SequenceBank) -> Result<()>;
    fn load_settings(&self) -> Result<Option<Settings>>;
    fn save_settings(&self, settings: &Settings) -> Result<()>;
}

/// Records as flat binary files in one directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `quartet` under the platform config directory
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("quartet"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str, extension: &str) -> PathBuf {
        self.dir.join(name).with_extension(extension)
    }

    fn read(&self, path: &Path, count: usize) -> Result<Option<Vec<i32>>> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let fields = records::from_bytes(&bytes, count);
        if fields.is_none() {
            log::warn!(
                "{} is too short ({} of {} bytes), ignoring it",
                path.display(),
                bytes.len(),
                count * 4
            );
        }
        Ok(fields)
    }

    fn write(&self, path: &Path, fields: &[i32]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        std::fs::write(path, records::to_bytes(fields))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Names of stored records with the given extension, sorted
    fn list(&self, extension: &str) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == extension))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn patches(&self) -> Result<Vec<String>> {
        self.list(PATCH_EXTENSION)
    }

    pub fn banks(&self) -> Result<Vec<String>> {
        self.list(BANK_EXTENSION)
    }
}

impl ParameterStore for FileStore {
    fn load_patch(&self, name: &str) -> Result<Option<PatchData>> {
        let fields = self.read(&self.path(name, PATCH_EXTENSION), PATCH_FIELDS)?;
        Ok(fields.and_then(|f| records::decode_patch(&f)))
    }

    fn save_patch(&self, name: &str, data: &PatchData) -> Result<()> {
        self.write(&self.path(name, PATCH_EXTENSION), &records::encode_patch(data))
    }

    fn load_bank(&self, name: &str) -> Result<Option<SequenceBank>> {
        let fields = self.read(&self.path(name, BANK_EXTENSION), BANK_FIELDS)?;
        Ok(fields.and_then(|f| records::decode_bank(&f)))
    }

    fn save_bank(&self, name: &str, bank: &SequenceBank) -> Result<()> {
        self.write(&self.path(name, BANK_EXTENSION), &records::encode_bank(bank))
    }

    /// A store without a settings file gets one with the defaults
    fn load_settings(&self) -> Result<Option<Settings>> {
        let path = self.dir.join(SETTINGS_FILE);
        if !path.exists() {
            let defaults = Settings::default();
            self.save_settings(&defaults)?;
            log::info!("Wrote default settings to {}", path.display());
            return Ok(Some(defaults));
        }
        let fields = self.read(&path, SETTINGS_FIELDS)?;
        Ok(fields.and_then(|f| records::decode_settings(&f)))
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write(&self.dir.join(SETTINGS_FILE), &records::encode_settings(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::BankMode;
    use crate::settings::SyncMode;
    use crate::synth::ParamId;

    #[test]
    fn patch_survives_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut data = PatchData::default();
        data.patch.set(ParamId::Attack, 250);
        data.patch.set(ParamId::OscOctave(1), 3);
        data.user_tables[1] = [1234; WAVE_SAMPLES];

        store.save_patch("lead", &data).unwrap();
        assert_eq!(store.load_patch("lead").unwrap(), Some(data));
        assert_eq!(store.patches().unwrap(), vec!["lead".to_string()]);
    }

    #[test]
    fn bank_survives_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        let mut bank = SequenceBank::new();
        bank.sequences[4].set_step(0, &[-12, 0], 64);
        bank.mode = BankMode::Random;

        store.save_bank("live", &bank).unwrap();
        assert_eq!(store.load_bank("live").unwrap(), Some(bank));
        assert!(store.patches().unwrap().is_empty());
    }

    #[test]
    fn missing_settings_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load_settings().unwrap(), Some(Settings::default()));
        assert!(dir.path().join(SETTINGS_FILE).exists());

        let s = Settings { sync: SyncMode::Send, midi_channel: 9, ..Settings::default() };
        store.save_settings(&s).unwrap();
        assert_eq!(store.load_settings().unwrap(), Some(s));
    }

    #[test]
    fn short_file_is_no_update_and_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        std::fs::write(dir.path().join("cut.patch"), [0u8; 100]).unwrap();
        assert_eq!(store.load_patch("cut").unwrap(), None);
        assert!(store.load_bank("nowhere").is_err());
    }

    #[test]
    fn patch_data_json_round_trip() {
        let mut data = PatchData::default();
        data.user_tables[2][5] = 99;
        let json = serde_json::to_string(&data).unwrap();
        let back: PatchData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
