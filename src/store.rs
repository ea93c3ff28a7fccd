use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ledger::FineLedger;
use crate::model::ParkingLot;

/// Store id of the lot collection snapshot.
pub const LOTS: &str = "lots";

/// Store id of the fine ledger snapshot.
pub const LEDGER: &str = "ledger";

/// Encode a value as one `[len][bincode][crc32]` frame.
fn encode_frame(writer: &mut impl Write, value: &impl Serialize) -> io::Result<()> {
    let payload =
        bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

fn decode_frame<T: DeserializeOwned>(reader: &mut impl Read) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf)?;
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "snapshot checksum mismatch"));
    }

    bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Full-overwrite snapshot store.
///
/// Each store id maps to one file `<dir>/<id>.snap` holding a single frame:
/// `[u32: len][bincode payload][u32: crc32]`. Writes go to a temp file that is
/// fsynced and renamed over the target, so a crash leaves either the old or
/// the new snapshot.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open (or create) the store directory.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, store_id: &str) -> PathBuf {
        self.dir.join(format!("{store_id}.snap"))
    }

    fn read<T: DeserializeOwned>(&self, store_id: &str) -> io::Result<Option<T>> {
        let file = match File::open(self.path(store_id)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        match decode_frame(&mut reader) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("truncated snapshot: {store_id}"),
            )),
            Err(e) => Err(e),
        }
    }

    fn write(&self, store_id: &str, value: &impl Serialize) -> io::Result<()> {
        let path = self.path(store_id);
        let tmp_path = path.with_extension("snap.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_frame(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &path)
    }

    /// `None` when nothing has been saved under `store_id` yet.
    pub fn load_lots(&self, store_id: &str) -> io::Result<Option<Vec<ParkingLot>>> {
        self.read(store_id)
    }

    pub fn save_lots(&self, store_id: &str, lots: &[ParkingLot]) -> io::Result<()> {
        self.write(store_id, &lots)
    }

    /// An empty ledger when nothing has been saved yet.
    pub fn load_ledger(&self, store_id: &str) -> io::Result<FineLedger> {
        Ok(self.read(store_id)?.unwrap_or_default())
    }

    pub fn save_ledger(&self, store_id: &str, ledger: &FineLedger) -> io::Result<()> {
        self.write(store_id, ledger)
    }
}
