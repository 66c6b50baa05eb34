//! `NetFlow` v5 payload.
//!
//! A packet is a [`Header`] followed by `count` [`Record`] instances. Both are
//! fixed width and written field by field in network byte order; there is no
//! padding beyond the `pad1`/`pad2` fields the format itself declares.

use std::io::Write;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// The only version this crate speaks.
pub const VERSION: u16 = 5;
/// Encoded size of [`Header`].
pub const HEADER_LEN: usize = 24;
/// Encoded size of [`Record`].
pub const RECORD_LEN: usize = 48;
/// Maximum records per packet. Keeps a packet well under a 1500 byte MTU.
pub const MAX_RECORDS: usize = 30;

/// `NetFlow` v5 packet header (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Header {
    /// `NetFlow` version, always 5
    pub version: u16,
    /// Number of flow records that follow
    pub count: u16,
    /// Milliseconds since the exporter booted
    pub sys_uptime: u32,
    /// Seconds since the Unix epoch
    pub unix_secs: u32,
    /// Residual nanoseconds since the Unix epoch
    pub unix_nsecs: u32,
    /// Sequence counter of packets sent by this exporter
    pub flow_sequence: u32,
    /// Type of flow switching engine
    pub engine_type: u8,
    /// ID of flow switching engine
    pub engine_id: u8,
    /// Sampling interval
    pub sampling_interval: u16,
}

/// `NetFlow` v5 flow record (48 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Record {
    /// Source IP address
    pub srcaddr: u32,
    /// Destination IP address
    pub dstaddr: u32,
    /// Next hop IP address, 0 when none
    pub nexthop: u32,
    /// SNMP input interface index
    pub input: u16,
    /// SNMP output interface index
    pub output: u16,
    /// Packets in the flow
    pub d_pkts: u32,
    /// Total bytes in the flow
    pub d_octets: u32,
    /// `SysUptime` at start of flow
    pub first: u32,
    /// `SysUptime` at end of flow
    pub last: u32,
    /// TCP/UDP source port
    pub srcport: u16,
    /// TCP/UDP destination port
    pub dstport: u16,
    /// Unused padding
    pub pad1: u8,
    /// Cumulative OR of TCP flags
    pub tcp_flags: u8,
    /// IP protocol (TCP=6, UDP=17, etc.)
    pub prot: u8,
    /// IP type of service
    pub tos: u8,
    /// Source BGP AS number
    pub src_as: u16,
    /// Destination BGP AS number
    pub dst_as: u16,
    /// Source address prefix mask
    pub src_mask: u8,
    /// Destination address prefix mask
    pub dst_mask: u8,
    /// Unused padding
    pub pad2: u16,
}

impl Header {
    /// Write header to bytes in network byte order
    ///
    /// # Errors
    ///
    /// Function will error if the underlying writer does.
    pub fn write<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        writer.write_all(&self.version.to_be_bytes())?;
        writer.write_all(&self.count.to_be_bytes())?;
        writer.write_all(&self.sys_uptime.to_be_bytes())?;
        writer.write_all(&self.unix_secs.to_be_bytes())?;
        writer.write_all(&self.unix_nsecs.to_be_bytes())?;
        writer.write_all(&self.flow_sequence.to_be_bytes())?;
        writer.write_all(&[self.engine_type])?;
        writer.write_all(&[self.engine_id])?;
        writer.write_all(&self.sampling_interval.to_be_bytes())?;
        Ok(())
    }

    /// Read a header from the front of `buf`, advancing it.
    ///
    /// The version field is returned as found; [`Packet::decode`] is where it
    /// is checked.
    ///
    /// # Errors
    ///
    /// Function will error if fewer than [`HEADER_LEN`] bytes remain.
    pub fn read<B>(buf: &mut B) -> Result<Self, Error>
    where
        B: Buf,
    {
        ensure(buf, HEADER_LEN)?;
        Ok(Self {
            version: buf.get_u16(),
            count: buf.get_u16(),
            sys_uptime: buf.get_u32(),
            unix_secs: buf.get_u32(),
            unix_nsecs: buf.get_u32(),
            flow_sequence: buf.get_u32(),
            engine_type: buf.get_u8(),
            engine_id: buf.get_u8(),
            sampling_interval: buf.get_u16(),
        })
    }
}

impl Record {
    /// Write flow record to bytes in network byte order
    ///
    /// # Errors
    ///
    /// Function will error if the underlying writer does.
    pub fn write<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        writer.write_all(&self.srcaddr.to_be_bytes())?;
        writer.write_all(&self.dstaddr.to_be_bytes())?;
        writer.write_all(&self.nexthop.to_be_bytes())?;
        writer.write_all(&self.input.to_be_bytes())?;
        writer.write_all(&self.output.to_be_bytes())?;
        writer.write_all(&self.d_pkts.to_be_bytes())?;
        writer.write_all(&self.d_octets.to_be_bytes())?;
        writer.write_all(&self.first.to_be_bytes())?;
        writer.write_all(&self.last.to_be_bytes())?;
        writer.write_all(&self.srcport.to_be_bytes())?;
        writer.write_all(&self.dstport.to_be_bytes())?;
        writer.write_all(&[self.pad1])?;
        writer.write_all(&[self.tcp_flags])?;
        writer.write_all(&[self.prot])?;
        writer.write_all(&[self.tos])?;
        writer.write_all(&self.src_as.to_be_bytes())?;
        writer.write_all(&self.dst_as.to_be_bytes())?;
        writer.write_all(&[self.src_mask])?;
        writer.write_all(&[self.dst_mask])?;
        writer.write_all(&self.pad2.to_be_bytes())?;
        Ok(())
    }

    /// Read a flow record from the front of `buf`, advancing it.
    ///
    /// # Errors
    ///
    /// Function will error if fewer than [`RECORD_LEN`] bytes remain.
    pub fn read<B>(buf: &mut B) -> Result<Self, Error>
    where
        B: Buf,
    {
        ensure(buf, RECORD_LEN)?;
        Ok(Self {
            srcaddr: buf.get_u32(),
            dstaddr: buf.get_u32(),
            nexthop: buf.get_u32(),
            input: buf.get_u16(),
            output: buf.get_u16(),
            d_pkts: buf.get_u32(),
            d_octets: buf.get_u32(),
            first: buf.get_u32(),
            last: buf.get_u32(),
            srcport: buf.get_u16(),
            dstport: buf.get_u16(),
            pad1: buf.get_u8(),
            tcp_flags: buf.get_u8(),
            prot: buf.get_u8(),
            tos: buf.get_u8(),
            src_as: buf.get_u16(),
            dst_as: buf.get_u16(),
            src_mask: buf.get_u8(),
            dst_mask: buf.get_u8(),
            pad2: buf.get_u16(),
        })
    }
}

fn ensure<B>(buf: &B, needed: usize) -> Result<(), Error>
where
    B: Buf,
{
    let available = buf.remaining();
    if available < needed {
        return Err(Error::Truncated { needed, available });
    }
    Ok(())
}

/// A complete `NetFlow` v5 packet: one header and its records.
///
/// Construction through [`Packet::new`] keeps `header.count` and the record
/// list in agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    records: Vec<Record>,
}

impl Packet {
    /// Create a new packet. The header's `version` and `count` are overwritten
    /// to match the format and `records`.
    ///
    /// # Errors
    ///
    /// Function will error if more than [`MAX_RECORDS`] records are given.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(mut header: Header, records: Vec<Record>) -> Result<Self, Error> {
        if records.len() > MAX_RECORDS {
            return Err(Error::TooManyRecords {
                count: records.len(),
                max: MAX_RECORDS,
            });
        }
        header.version = VERSION;
        // MAX_RECORDS fits a u16
        header.count = records.len() as u16;
        Ok(Self { header, records })
    }

    /// The packet header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The packet's flow records, in wire order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Encoded length of this packet in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + RECORD_LEN * self.records.len()
    }

    /// Write the packet, header first, into `writer`.
    ///
    /// # Errors
    ///
    /// Function will error if the underlying writer does.
    pub fn write<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        self.header.write(writer)?;
        for record in &self.records {
            record.write(writer)?;
        }
        Ok(())
    }

    /// Encode the packet into a freshly allocated buffer, ready to be handed
    /// to a socket as a single datagram.
    ///
    /// # Errors
    ///
    /// See [`Packet::write`].
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut writer = BytesMut::with_capacity(self.encoded_len()).writer();
        self.write(&mut writer)?;
        Ok(writer.into_inner().freeze())
    }

    /// Decode one packet from a complete datagram.
    ///
    /// # Errors
    ///
    /// Function will error if the version is not 5, if the datagram is shorter
    /// than its header announces or if bytes remain after the final record.
    pub fn decode(mut datagram: &[u8]) -> Result<Self, Error> {
        let header = Header::read(&mut datagram)?;
        if header.version != VERSION {
            return Err(Error::Version(header.version));
        }
        let count = usize::from(header.count);
        if count > MAX_RECORDS {
            return Err(Error::TooManyRecords {
                count,
                max: MAX_RECORDS,
            });
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(Record::read(&mut datagram)?);
        }
        if datagram.has_remaining() {
            return Err(Error::Trailing(datagram.remaining()));
        }
        Ok(Self { header, records })
    }
}
