use uuid::Uuid;

/**
 * The advertised local name of the peripheral to control.
 */
pub const TARGET_NAME: &str = "SYNC";

/**
 * How long (milliseconds) a scan runs before it is stopped automatically.
 */
pub const SCAN_TIMEOUT: u64 = 5000;

/**
 * How long (milliseconds) a write to a characteristic may take before the peripheral acknowledges it.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a disconnect request may take. Disconnecting succeeds regardless.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * The UUID of the Bluetooth BLE service exposing the motor controls.
 */
pub const MOTOR_SERVICE: &str = "000000ff-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic to send motor commands to.
 */
pub const MOTOR_WRITE_CHARACTERISTIC: &str = "0000ff03-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the characteristic reporting the motor angle. Never read.
 */
pub const MOTOR_ANGLE_CHARACTERISTIC: &str = "0000ff04-0000-1000-8000-00805f9b34fb";

pub const COMMAND_FORWARD: [u8; 2] = [0x01, 0x03];
pub const COMMAND_REVERSE: [u8; 2] = [0x01, 0x01];
pub const COMMAND_STOP: [u8; 2] = [0x01, 0x00];
pub const COMMAND_START_BREATHING: [u8; 3] = [0x01, 0x01, 0x01];
pub const COMMAND_STOP_BREATHING: [u8; 3] = [0x01, 0x00, 0x01];

pub const MOTOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x000000ff_0000_1000_8000_00805f9b34fb);
pub const MOTOR_WRITE_UUID: Uuid = Uuid::from_u128(0x0000ff03_0000_1000_8000_00805f9b34fb);
pub const MOTOR_ANGLE_UUID: Uuid = Uuid::from_u128(0x0000ff04_0000_1000_8000_00805f9b34fb);
