//! Channel naming tree
//!
//! Channel names are hierarchical, segments joined by [`TREE_DELIM`]. Live
//! publication prefixes every name with [`ROBOT_RT_ROOT_NAME`].
//!
//! Robot state lives under `joints_state::` and `motors_state::`
//! (`positions`, `velocities`, `accelerations`, `torques`, `currents`,
//! `PWM`, `PIDs`). Sensors sit one level below their group, e.g.
//! `FTs::l_leg_ft`, and groups with a fixed layout get default element
//! labels. A 9-element `imus::<sensor>` reading is split into the
//! orientation, accelerometer and gyro channels of that sensor.

/// Segment delimiter of the naming tree
pub const TREE_DELIM: &str = "::";

/// Root of every name published by the real-time publisher
pub const ROBOT_RT_ROOT_NAME: &str = "robot_realtime";

pub const JOINT_STATE_POSITIONS: &str = "joints_state::positions";
pub const FTS_NAME: &str = "FTs";
pub const IMUS_NAME: &str = "imus";
pub const GYROS_NAME: &str = "gyros";
pub const ACCELEROMETERS_NAME: &str = "accelerometers";
pub const ORIENTATIONS_NAME: &str = "orientations";
pub const MAGNETOMETERS_NAME: &str = "magnetometers";
pub const CARTESIAN_WRENCHES_NAME: &str = "cartesian_wrenches";
pub const TEMPERATURE_NAME: &str = "temperatures";
pub const CAMERA_NAME: &str = "camera";
pub const TIMESTAMPS_NAME: &str = "timestamps";
pub const ROBOT_NAME: &str = "yarp_robot_name";
pub const DESCRIPTION_LIST_NAME: &str = "description_list";

pub const FT_ELEMENTS_NAMES: [&str; 6] = ["f_x", "f_y", "f_z", "mu_x", "mu_y", "mu_z"];
pub const GYRO_ELEMENTS_NAMES: [&str; 3] = ["omega_x", "omega_y", "omega_z"];
pub const ACC_ELEMENTS_NAMES: [&str; 3] = ["a_x", "a_y", "a_z"];
pub const ORIENTATION_ELEMENTS_NAMES: [&str; 3] = ["r", "p", "y"];
pub const MAGNETOMETER_ELEMENTS_NAMES: [&str; 3] = ["mag_x", "mag_y", "mag_z"];
pub const TEMPERATURE_ELEMENTS_NAMES: [&str; 1] = ["temperature"];
pub const CAMERA_ELEMENTS_NAMES: [&str; 1] = ["timestamp"];

/// Join segments with the tree delimiter
pub fn join<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(TREE_DELIM)
}

/// Name of a channel under the real-time root
pub fn rt_name(channel: &str) -> String {
    join([ROBOT_RT_ROOT_NAME, channel])
}

/// Name of a sensor channel below a group, e.g. `FTs::l_arm_ft`
pub fn sensor_name(group: &str, sensor: &str) -> String {
    join([group, sensor])
}

/// First segment of a channel name
pub fn group(channel: &str) -> &str {
    channel.split(TREE_DELIM).next().unwrap_or(channel)
}

/// Sensor of an `imus::<sensor>` channel
pub fn imu_sensor(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(IMUS_NAME)?
        .strip_prefix(TREE_DELIM)
        .filter(|sensor| !sensor.is_empty())
}

/// Name of the timestamp channel of a camera stream
pub fn camera_channel_name(camera: &str, kind: crate::types::ImageKind) -> String {
    join([CAMERA_NAME, camera, kind.as_str()])
}

/// Replace characters that offline tools reject as struct keys
pub fn sanitize(name: &str) -> String {
    name.replace('-', "_")
}

/// Name of the channel holding the text logs of one producer process
pub fn log_channel_name(port_system: &str, port_prefix: &str, process_name: &str, pid: &str) -> String {
    sanitize(&format!(
        "{}{d}{}{d}{}{d}p{}",
        port_system,
        port_prefix,
        process_name,
        pid,
        d = TREE_DELIM
    ))
}

/// Default element labels for a well-known sensor group
pub fn default_labels(group: &str) -> Option<&'static [&'static str]> {
    match group {
        FTS_NAME | CARTESIAN_WRENCHES_NAME => Some(&FT_ELEMENTS_NAMES),
        GYROS_NAME => Some(&GYRO_ELEMENTS_NAMES),
        ACCELEROMETERS_NAME => Some(&ACC_ELEMENTS_NAMES),
        ORIENTATIONS_NAME => Some(&ORIENTATION_ELEMENTS_NAMES),
        MAGNETOMETERS_NAME => Some(&MAGNETOMETER_ELEMENTS_NAMES),
        TEMPERATURE_NAME => Some(&TEMPERATURE_ELEMENTS_NAMES),
        _ => None,
    }
}

/// Default labels of `channel` when its group has them and `size` matches
pub fn default_labels_for(channel: &str, size: usize) -> Vec<String> {
    default_labels(group(channel))
        .filter(|labels| labels.len() == size)
        .map(|labels| labels.iter().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

/// Split a 9-element IMU measurement into orientation, accelerometer and gyro
pub fn unpack_imu(imu: &[f64; 9]) -> ([f64; 3], [f64; 3], [f64; 3]) {
    let mut orientation = [0.0; 3];
    let mut accelerometer = [0.0; 3];
    let mut gyro = [0.0; 3];
    orientation.copy_from_slice(&imu[0..3]);
    accelerometer.copy_from_slice(&imu[3..6]);
    gyro.copy_from_slice(&imu[6..9]);
    (orientation, accelerometer, gyro)
}
