//! USB identifiers, CDC-ACM request codes, and status codes.

// ── Device identity ──

/// Arduino SA vendor id.
pub const ARDUINO_VID: u16 = 0x2341;

/// Arduino Uno (ATmega16U2 USB bridge) product id.
pub const UNO_PID: u16 = 0x0043;

/// Default prefix for published device nodes (`ardu0`, `ardu1`, ...).
pub const DEFAULT_NODE_PREFIX: &str = "ardu";

/// Default number of node minors the registry hands out.
pub const DEFAULT_MAX_NODES: u32 = 8;

// ── Interface classes ──

/// CDC communication interface class.
pub const CLASS_CDC_COMM: u8 = 0x02;

/// CDC data interface class (carries the bulk endpoints).
pub const CLASS_CDC_DATA: u8 = 0x0A;

/// Endpoint address bit marking the IN (device-to-host) direction.
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// `bmAttributes` transfer-type mask and the bulk value.
pub const ENDPOINT_XFER_MASK: u8 = 0x03;
pub const ENDPOINT_XFER_BULK: u8 = 0x02;

// ── CDC-ACM class requests ──

pub const CDC_SET_LINE_CODING: u8 = 0x20;
pub const CDC_SET_CONTROL_LINE_STATE: u8 = 0x22;

/// `SET_CONTROL_LINE_STATE` bits.
pub const CDC_LINE_DTR: u16 = 0x0001;
pub const CDC_LINE_RTS: u16 = 0x0002;

/// Timeout for each control transfer of the init handshake.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

/// Baud rates the 16U2 bridge firmware accepts.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 115200,
];

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Encode a CDC `SET_LINE_CODING` payload for 8 data bits, no parity, 1 stop bit.
///
/// Layout: `[u32 dwDTERate][u8 bCharFormat][u8 bParityType][u8 bDataBits]`
pub fn line_coding_8n1(baud_rate: u32) -> [u8; 7] {
    let rate = baud_rate.to_le_bytes();
    [rate[0], rate[1], rate[2], rate[3], 0, 0, 8]
}

// ── Completion status codes ──
//
// Transfer failures are reported with errno-style codes so the read path
// can surface `Io { code }` the way a character device would.

pub const EIO: i32 = 5;
pub const EPIPE: i32 = 32;
pub const EOVERFLOW: i32 = 75;
pub const EPROTO: i32 = 71;
pub const ENODEV: i32 = 19;
pub const EBUSY: i32 = 16;

/// Short human-readable name for an errno-style status code.
pub fn status_name(code: i32) -> &'static str {
    match code {
        EIO => "I/O error",
        EPIPE => "endpoint stalled",
        EOVERFLOW => "babble",
        EPROTO => "protocol error",
        ENODEV => "no such device",
        EBUSY => "device busy",
        _ => "transfer error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_coding_9600() {
        // 9600 = 0x2580
        assert_eq!(line_coding_8n1(9600), [0x80, 0x25, 0x00, 0x00, 0, 0, 8]);
    }

    #[test]
    fn line_coding_115200() {
        // 115200 = 0x0001C200
        assert_eq!(line_coding_8n1(115200), [0x00, 0xC2, 0x01, 0x00, 0, 0, 8]);
    }

    #[test]
    fn default_baud_rate_is_supported() {
        assert!(SUPPORTED_BAUD_RATES.contains(&DEFAULT_BAUD_RATE));
    }

    #[test]
    fn status_names() {
        assert_eq!(status_name(EIO), "I/O error");
        assert_eq!(status_name(EPIPE), "endpoint stalled");
        assert_eq!(status_name(-1234), "transfer error");
    }
}
