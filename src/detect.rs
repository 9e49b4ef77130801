use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

// V4L2 capability flags
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;
const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x00001000;
const V4L2_CAP_DEVICE_CAPS: u32 = 0x80000000;

/// Highest /dev/videoN index probed
const MAX_DEVICES: u32 = 64;

#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

// Verify struct matches kernel layout (104 bytes)
const _: () = assert!(std::mem::size_of::<V4l2Capability>() == 104);

// VIDIOC_QUERYCAP = _IOR('V', 0, struct v4l2_capability)
nix::ioctl_read!(vidioc_querycap, b'V', 0, V4l2Capability);

pub fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{}", index))
}

fn query_cap(index: u32) -> Option<V4l2Capability> {
    let file = OpenOptions::new().read(true).open(device_path(index)).ok()?;
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    unsafe { vidioc_querycap(file.as_raw_fd(), &mut cap).ok()? };
    Some(cap)
}

fn c_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

fn effective_caps(cap: &V4l2Capability) -> u32 {
    if cap.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    }
}

/// Loopback devices advertise capture but only replay what another process writes.
fn is_loopback(cap: &V4l2Capability) -> bool {
    c_str(&cap.driver).contains("v4l2 loopback")
        || c_str(&cap.bus_info).starts_with("platform:v4l2loopback-")
}

fn is_capture(cap: &V4l2Capability) -> bool {
    let caps = effective_caps(cap);
    caps & V4L2_CAP_VIDEO_CAPTURE != 0 || caps & V4L2_CAP_VIDEO_CAPTURE_MPLANE != 0
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub bus_info: String,
}

/// List all real capture cameras, skipping loopback and metadata-only nodes.
pub fn list_cameras() -> Vec<CameraInfo> {
    (0..MAX_DEVICES)
        .filter_map(|index| {
            let cap = query_cap(index)?;
            if is_loopback(&cap) || !is_capture(&cap) {
                return None;
            }
            Some(CameraInfo {
                index,
                name: c_str(&cap.card),
                bus_info: c_str(&cap.bus_info),
            })
        })
        .collect()
}

/// The camera a scan uses when none is configured: the first real capture device.
pub fn default_camera() -> Option<u32> {
    list_cameras().first().map(|c| c.index)
}

/// Get the human-readable name (card field) for a video device.
pub fn device_name(index: u32) -> Option<String> {
    query_cap(index).map(|cap| c_str(&cap.card))
}

/// Existing /dev/videoN nodes, whether or not this process may open them.
pub fn device_nodes() -> Vec<PathBuf> {
    (0..MAX_DEVICES)
        .map(device_path)
        .filter(|path| path.exists())
        .collect()
}
