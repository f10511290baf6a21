//! TDMA frame encoding / decoding
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use ieee802154::mac::{DecodeError, ShortAddress};

/// Length of the encoded frame header
pub const HEADER_LEN: usize = 5;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_LEN: usize = 116;

/// Maximum encoded frame length
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Reserved payload identifying a beacon frame
pub const BEACON_MARKER: &[u8] = b"TDMABeacon";

/// Owned payload storage
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Frame header, `source (u16 LE) | destination (u16 LE) | seq (u8)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub source: ShortAddress,
    pub destination: ShortAddress,
    pub seq: u8,
}

impl Header {
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        LittleEndian::write_u16(&mut buff[0..], self.source.0);
        LittleEndian::write_u16(&mut buff[2..], self.destination.0);
        buff[4] = self.seq;

        HEADER_LEN
    }

    pub fn decode(buff: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buff.len() < HEADER_LEN {
            return Err(DecodeError::NotEnoughBytes);
        }

        let h = Header {
            source: ShortAddress(LittleEndian::read_u16(&buff[0..])),
            destination: ShortAddress(LittleEndian::read_u16(&buff[2..])),
            seq: buff[4],
        };

        Ok((h, HEADER_LEN))
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == ShortAddress::broadcast()
    }
}

/// Frames are decoded once at the receive boundary into beacons or data
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Broadcast time reference
    Beacon(Header),
    /// Anything else, passed to higher layers unchanged
    Data(Header, Payload),
}

impl Frame {
    /// Build a broadcast beacon from the provided source
    pub fn beacon(source: ShortAddress, seq: u8) -> Frame {
        Frame::Beacon(Header {
            source,
            destination: ShortAddress::broadcast(),
            seq,
        })
    }

    /// Build a data frame, the payload must already fit frame storage
    pub fn data(destination: ShortAddress, source: ShortAddress, seq: u8, payload: Payload) -> Frame {
        Frame::Data(Header{ source, destination, seq }, payload)
    }

    pub fn header(&self) -> &Header {
        match self {
            Frame::Beacon(h) => h,
            Frame::Data(h, _) => h,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Beacon(_) => BEACON_MARKER,
            Frame::Data(_, p) => p,
        }
    }

    /// Encode a frame into the provided buffer, returning the encoded length
    ///
    /// Buffers must be at least [`MAX_FRAME_LEN`] bytes long
    pub fn encode(&self, buff: &mut [u8]) -> usize {
        let mut len = self.header().encode(buff);

        let p = self.payload();
        buff[len..len + p.len()].copy_from_slice(p);
        len += p.len();

        len
    }

    pub fn decode(buff: &[u8]) -> Result<Self, DecodeError> {
        let (header, n) = Header::decode(buff)?;
        let body = &buff[n..];

        // Beacons are only recognised as broadcasts carrying the marker
        if header.is_broadcast() && body == BEACON_MARKER {
            return Ok(Frame::Beacon(header));
        }

        let payload = Vec::from_slice(body).map_err(|_e| DecodeError::InvalidValue)?;

        Ok(Frame::Data(header, payload))
    }
}
