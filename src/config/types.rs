use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    DISCONNECT_DEADLINE, MOTOR_ANGLE_UUID, MOTOR_SERVICE_UUID, MOTOR_WRITE_UUID, SCAN_TIMEOUT,
    TARGET_NAME, WRITE_DEADLINE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Advertised name a peripheral must have to be listed. Compared case-sensitively.
    pub target_name: String,
    pub scan_timeout_ms: u64,
    pub service_uuid: Uuid,
    pub write_characteristic_uuid: Uuid,
    // reserved: the angle characteristic is never read
    pub read_angle_characteristic_uuid: Uuid,
    pub write_deadline_ms: u64,
    pub disconnect_deadline_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_name: TARGET_NAME.to_string(),
            scan_timeout_ms: SCAN_TIMEOUT,
            service_uuid: MOTOR_SERVICE_UUID,
            write_characteristic_uuid: MOTOR_WRITE_UUID,
            read_angle_characteristic_uuid: MOTOR_ANGLE_UUID,
            write_deadline_ms: WRITE_DEADLINE,
            disconnect_deadline_ms: DISCONNECT_DEADLINE,
        }
    }
}
