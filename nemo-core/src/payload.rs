//! The fixed-layout 88-byte request/response datagram (format version 4).

use crate::error::DatagramError;

/// On-wire magic number, the big-endian bytes of ASCII `"nemo"`.
pub const MAGIC: u32 = 0x6e65_6d6f;

/// The only format version this crate speaks.
pub const FORMAT_VERSION: u8 = 4;

/// Size in bytes of the fixed portion of every datagram. Datagrams may carry
/// additional, arbitrary trailing bytes up to `payload_length`.
pub const BASE_SIZE: usize = 88;

pub const MSG_TYPE_RESPONSE: u8 = 1;
pub const MSG_TYPE_REQUEST: u8 = 2;

/// The decoded form of the 88-byte base. Trailing bytes beyond `BASE_SIZE`
/// (when `payload_length > BASE_SIZE`) are not represented here; they are
/// carried alongside as a plain byte slice by callers that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Payload {
    pub magic: u32,
    pub format_version: u8,
    pub msg_type: u8,
    pub udp_port: u16,
    pub ttl_req_dep: u8,
    pub ttl_req_arr: u8,
    pub ttl_res_dep: u8,
    pub ip_version: u8,
    pub payload_length: u16,
    pub seq_num: u64,
    pub seq_len: u64,
    pub addr_low: u64,
    pub addr_high: u64,
    pub key: u64,
    pub mono_req: u64,
    pub real_req: u64,
    pub mono_res: u64,
    pub real_res: u64,
}

impl Payload {
    /// Encodes `self` into a fresh 88-byte big-endian buffer. The padding
    /// field is always zeroed.
    pub fn encode(&self) -> [u8; BASE_SIZE] {
        let mut buf = [0u8; BASE_SIZE];

        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.format_version;
        buf[5] = self.msg_type;
        buf[6..8].copy_from_slice(&self.udp_port.to_be_bytes());
        buf[8] = self.ttl_req_dep;
        buf[9] = self.ttl_req_arr;
        buf[10] = self.ttl_res_dep;
        buf[11] = self.ip_version;
        buf[12..14].copy_from_slice(&self.payload_length.to_be_bytes());
        // buf[14..16] stays zero: the reserved padding field.
        buf[16..24].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[24..32].copy_from_slice(&self.seq_len.to_be_bytes());
        buf[32..40].copy_from_slice(&self.addr_low.to_be_bytes());
        buf[40..48].copy_from_slice(&self.addr_high.to_be_bytes());
        buf[48..56].copy_from_slice(&self.key.to_be_bytes());
        buf[56..64].copy_from_slice(&self.mono_req.to_be_bytes());
        buf[64..72].copy_from_slice(&self.real_req.to_be_bytes());
        buf[72..80].copy_from_slice(&self.mono_res.to_be_bytes());
        buf[80..88].copy_from_slice(&self.real_res.to_be_bytes());

        buf
    }

    /// Decodes an 88-byte buffer. Always succeeds structurally; callers run
    /// [`Payload::validate`] separately to reject malformed datagrams.
    pub fn decode(buf: &[u8; BASE_SIZE]) -> Self {
        Payload {
            magic: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            format_version: buf[4],
            msg_type: buf[5],
            udp_port: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
            ttl_req_dep: buf[8],
            ttl_req_arr: buf[9],
            ttl_res_dep: buf[10],
            ip_version: buf[11],
            payload_length: u16::from_be_bytes(buf[12..14].try_into().unwrap()),
            seq_num: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            seq_len: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
            addr_low: u64::from_be_bytes(buf[32..40].try_into().unwrap()),
            addr_high: u64::from_be_bytes(buf[40..48].try_into().unwrap()),
            key: u64::from_be_bytes(buf[48..56].try_into().unwrap()),
            mono_req: u64::from_be_bytes(buf[56..64].try_into().unwrap()),
            real_req: u64::from_be_bytes(buf[64..72].try_into().unwrap()),
            mono_res: u64::from_be_bytes(buf[72..80].try_into().unwrap()),
            real_res: u64::from_be_bytes(buf[80..88].try_into().unwrap()),
        }
    }

    /// Checks magic, format version, and (for responses specifically)
    /// message type. Does not check `payload_length` against the received
    /// length on the wire; that comparison needs the raw datagram length
    /// and is done by the caller (see `packet_io::receive_packet`).
    pub fn validate(&self) -> Result<(), DatagramError> {
        if self.magic != MAGIC {
            return Err(DatagramError::Magic);
        }
        if self.format_version != FORMAT_VERSION {
            return Err(DatagramError::Version);
        }
        if self.msg_type != MSG_TYPE_REQUEST && self.msg_type != MSG_TYPE_RESPONSE {
            return Err(DatagramError::Type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        Payload {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            udp_port: 23000,
            ttl_req_dep: 64,
            ttl_req_arr: 0,
            ttl_res_dep: 0,
            ip_version: 4,
            payload_length: BASE_SIZE as u16,
            seq_num: 7,
            seq_len: 100,
            addr_low: 0x7f00_0001,
            addr_high: 0,
            key: 42,
            mono_req: 1_000_000_000,
            real_req: 2_000_000_000,
            mono_res: 0,
            real_res: 0,
        }
    }

    #[test]
    fn round_trips() {
        let p = sample();
        assert_eq!(Payload::decode(&p.encode()), p);
    }

    #[test]
    fn encodes_magic_as_nemo_ascii() {
        let buf = sample().encode();
        assert_eq!(&buf[0..4], b"nemo");
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut p = sample();
        p.magic = 0;
        assert_eq!(p.validate(), Err(DatagramError::Magic));
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut p = sample();
        p.format_version = 2;
        assert_eq!(p.validate(), Err(DatagramError::Version));
    }

    #[test]
    fn validate_rejects_bad_type() {
        let mut p = sample();
        p.msg_type = 0;
        assert_eq!(p.validate(), Err(DatagramError::Type));
    }

    #[test]
    fn validate_accepts_well_formed_payload() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn trailing_bytes_survive_a_send_receive_round_trip() {
        // payload_length beyond BASE_SIZE is carried by the caller, not by
        // `Payload` itself; decoding only ever looks at the first 88 bytes.
        let p = sample();
        let mut wire = p.encode().to_vec();
        wire.extend_from_slice(b"trailing-bytes-are-opaque");

        let base: [u8; BASE_SIZE] = wire[..BASE_SIZE].try_into().unwrap();
        assert_eq!(Payload::decode(&base), p);
        assert_eq!(&wire[BASE_SIZE..], b"trailing-bytes-are-opaque");
    }
}
