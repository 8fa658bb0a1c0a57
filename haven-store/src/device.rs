//! Device registry.
//!
//! Devices enter the registry on first discovery and are upgraded to
//! paired after a successful pairing handshake. Rows are never removed
//! except through `remove_device` (an explicit user action).

use crate::error::{StoreError, StoreResult};
use crate::Store;
use haven_types::{Device, DeviceId, DeviceType};
use rusqlite::{params, OptionalExtension, Row};

impl Store {
    /// Inserts a newly discovered device, or refreshes the address and
    /// last-seen marker of a known one. Pairing state is left untouched.
    pub fn upsert_discovered_device(&self, device: &Device) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO devices (device_id, display_name, device_type, address, port, last_seen, paired)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
             ON CONFLICT(device_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 device_type = excluded.device_type,
                 address = excluded.address,
                 port = excluded.port,
                 last_seen = excluded.last_seen",
            params![
                device.device_id.to_string(),
                device.display_name,
                device.device_type.as_str(),
                device.address,
                device.port,
                device.last_seen,
            ],
        )?;
        Ok(())
    }

    /// Marks a device as paired, persisting its public key and the
    /// long-term pairing key derived during the handshake.
    pub fn mark_paired(
        &self,
        device_id: &DeviceId,
        public_key: &[u8],
        pairing_key: &[u8],
    ) -> StoreResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE devices SET paired = 1, public_key = ?2, pairing_key = ?3 WHERE device_id = ?1",
            params![device_id.to_string(), public_key, pairing_key],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("device {device_id}")));
        }
        Ok(())
    }

    /// Returns the persisted long-term pairing key for a paired device.
    pub fn pairing_key(&self, device_id: &DeviceId) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.lock();
        let key: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT pairing_key FROM devices WHERE device_id = ?1 AND paired = 1",
                params![device_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key.flatten())
    }

    /// Looks up a single device.
    pub fn get_device(&self, device_id: &DeviceId) -> StoreResult<Option<Device>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT device_id, display_name, device_type, public_key, address, port, last_seen, paired
             FROM devices WHERE device_id = ?1",
            params![device_id.to_string()],
            device_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Lists all known devices, most recently seen first.
    pub fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id, display_name, device_type, public_key, address, port, last_seen, paired
             FROM devices ORDER BY last_seen DESC",
        )?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    /// Updates a device's last-seen marker.
    pub fn touch_device(&self, device_id: &DeviceId, last_seen: i64) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE devices SET last_seen = ?2 WHERE device_id = ?1",
            params![device_id.to_string(), last_seen],
        )?;
        Ok(())
    }

    /// Removes a device. User-initiated only; sync never calls this.
    pub fn remove_device(&self, device_id: &DeviceId) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM devices WHERE device_id = ?1",
            params![device_id.to_string()],
        )?;
        Ok(())
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let id_str: String = row.get(0)?;
    let type_str: String = row.get(2)?;
    Ok(Device {
        device_id: id_str.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        display_name: row.get(1)?,
        device_type: DeviceType::parse(&type_str).unwrap_or(DeviceType::Desktop),
        public_key: row.get(3)?,
        address: row.get(4)?,
        port: row.get::<_, i64>(5)? as u16,
        last_seen: row.get(6)?,
        paired: row.get::<_, i64>(7)? == 1,
    })
}
