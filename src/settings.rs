use esp_idf_svc::nvs::{EspDefaultNvs, EspDefaultNvsPartition};
use phasemeter::config::MeterConfig;

const NAMESPACE: &str = "phasemeter";

/// Meter configuration stored as a JSON string in NVS. Missing key means
/// defaults.
pub fn load(partition: EspDefaultNvsPartition) -> Result<MeterConfig, anyhow::Error> {
    let nvs = EspDefaultNvs::new(partition, NAMESPACE, true)?;

    let mut config = match get_string(&nvs, "config")? {
        Some(json) => MeterConfig::from_json(&json)?,
        None => MeterConfig::default(),
    };
    config.device_id = device_id()?;
    Ok(config)
}

/// Factory MAC padded to the 8 byte id used in the nonce
fn device_id() -> Result<[u8; 8], anyhow::Error> {
    let mut mac = [0u8; 6];
    esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    let mut id = [0u8; 8];
    id[2..].copy_from_slice(&mac);
    Ok(id)
}

fn get_string(nvs: &EspDefaultNvs, key: &str) -> Result<Option<String>, anyhow::Error> {
    let len = nvs.str_len(key)?;
    if let Some(len) = len {
        let mut buf = vec![0u8; len];
        Ok(nvs.get_str(key, &mut buf)?.map(|s| s.trim_end_matches('\0').into()))
    } else {
        Ok(None)
    }
}
