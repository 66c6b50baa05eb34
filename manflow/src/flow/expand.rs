//! Template expansion.
//!
//! Each field of a [`Template`] is expanded independently into the list of
//! values it denotes and the template becomes the cartesian product of those
//! lists. The product is taken in a fixed order -- source address,
//! destination address, source port, destination port, protocol, innermost
//! last -- because every host seeds the resulting sequence in order and must
//! see the same sequence to agree on the seeded values.

use std::{net::Ipv4Addr, str::FromStr, sync::Arc};

use ipnetwork::Ipv4Network;

use super::{Error, Field, MAX_TEMPLATE_FLOWS, Template};

/// One concrete combination of a template's fields.
///
/// A `None` address or a zero port or protocol is unset and will be filled in
/// by [`super::seed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedFlow {
    /// Source address, if set
    pub src_addr: Option<Ipv4Addr>,
    /// Source port, 0 when unset
    pub src_port: u16,
    /// Destination address, if set
    pub dst_addr: Option<Ipv4Addr>,
    /// Destination port, 0 when unset
    pub dst_port: u16,
    /// IP protocol, 0 when unset
    pub proto: u8,
    /// Host names along the path, shared by every flow of the template
    pub hops: Arc<[String]>,
    /// Emission limit, 0 for none
    pub count: u32,
}

/// Expand every template, in order, into its concrete flows.
///
/// # Errors
///
/// Function will error on a malformed CIDR block or address, a non-integer
/// port or protocol token, an inverted range, a value too wide for its field
/// or a template expanding to more than [`MAX_TEMPLATE_FLOWS`] flows. Nothing
/// is silently coerced.
pub fn expand(templates: &[Template]) -> Result<Vec<ExpandedFlow>, Error> {
    let mut flows = Vec::new();
    for (index, template) in templates.iter().enumerate() {
        expand_one(index, template, &mut flows)?;
    }
    Ok(flows)
}

#[allow(clippy::cast_possible_truncation)]
fn expand_one(index: usize, template: &Template, out: &mut Vec<ExpandedFlow>) -> Result<(), Error> {
    let src_addrs = addresses(index, Field::SrcAddr, &template.src_addr)?;
    let dst_addrs = addresses(index, Field::DstAddr, &template.dst_addr)?;
    let src_ports = integers(index, Field::SrcPort, &template.src_port, u64::from(u16::MAX))?;
    let dst_ports = integers(index, Field::DstPort, &template.dst_port, u64::from(u16::MAX))?;
    let protos = integers(index, Field::Proto, &template.proto, u64::from(u8::MAX))?;

    // at most 2^32 * 2^32 * 2^16 * 2^16 * 2^8, no overflow
    let count = [
        src_addrs.len(),
        dst_addrs.len(),
        src_ports.len() as u64,
        dst_ports.len() as u64,
        protos.len() as u64,
    ]
    .into_iter()
    .fold(1_u128, |product, len| product * u128::from(len));
    if count > u128::from(MAX_TEMPLATE_FLOWS) {
        return Err(Error::TooManyFlows {
            template: index,
            count,
        });
    }

    let src_addrs = src_addrs.values();
    let dst_addrs = dst_addrs.values();
    let hops: Arc<[String]> = Arc::from(template.hops.as_slice());
    out.reserve(count as usize);

    // `integers` has range checked every value against the field width, the
    // casts below are lossless.
    for &src_addr in &src_addrs {
        for &dst_addr in &dst_addrs {
            for &src_port in &src_ports {
                for &dst_port in &dst_ports {
                    for &proto in &protos {
                        out.push(ExpandedFlow {
                            src_addr,
                            src_port: src_port as u16,
                            dst_addr,
                            dst_port: dst_port as u16,
                            proto: proto as u8,
                            hops: Arc::clone(&hops),
                            count: template.count,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// A parsed address field, counted before it is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addresses {
    Unset,
    One(Ipv4Addr),
    /// `len` consecutive addresses starting at `first`
    Run { first: u32, len: u64 },
}

impl Addresses {
    fn len(self) -> u64 {
        match self {
            Self::Unset | Self::One(_) => 1,
            Self::Run { len, .. } => len,
        }
    }

    fn values(self) -> Vec<Option<Ipv4Addr>> {
        match self {
            Self::Unset => vec![None],
            Self::One(addr) => vec![Some(addr)],
            Self::Run { first, len } => {
                let first = u64::from(first);
                (first..first + len)
                    .map(|addr| u32::try_from(addr).ok().map(Ipv4Addr::from))
                    .collect()
            }
        }
    }
}

/// Parse an address field. An empty field is a single unset address.
fn addresses(template: usize, field: Field, input: &str) -> Result<Addresses, Error> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Addresses::Unset);
    }
    if input.contains('/') {
        return cidr_block(template, field, input);
    }
    Ipv4Addr::from_str(input)
        .map(Addresses::One)
        .map_err(|_| Error::Address {
            template,
            field,
            value: input.to_string(),
        })
}

/// The usable host addresses of a CIDR block: every address but the network
/// and broadcast addresses. Blocks of one or two addresses, /32 and /31, have
/// no such addresses to spare and are kept whole.
///
/// Host bits given in `input` are masked off, `10.0.0.5/30` is the
/// `10.0.0.4/30` block.
fn cidr_block(template: usize, field: Field, input: &str) -> Result<Addresses, Error> {
    let cidr_error = |source| Error::Cidr {
        template,
        field,
        value: input.to_string(),
        source,
    };
    let given = Ipv4Network::from_str(input).map_err(cidr_error)?;
    let block = Ipv4Network::new(given.network(), given.prefix()).map_err(cidr_error)?;

    let network = u32::from(block.network());
    let size = 1_u64 << (32 - u32::from(block.prefix()));
    Ok(if size > 2 {
        Addresses::Run {
            first: network + 1,
            len: size - 2,
        }
    } else {
        Addresses::Run {
            first: network,
            len: size,
        }
    })
}

/// Expand a port or protocol field into its values, each no greater than
/// `max`. An empty field is the single unset value 0.
fn integers(template: usize, field: Field, input: &str, max: u64) -> Result<Vec<u64>, Error> {
    let input = input.trim();
    let token = |raw: &str| -> Result<u64, Error> {
        let raw = raw.trim();
        let value = raw.parse::<u64>().map_err(|_| Error::Integer {
            template,
            field,
            token: raw.to_string(),
        })?;
        if value > max {
            return Err(Error::OutOfRange {
                template,
                field,
                value,
                max,
            });
        }
        Ok(value)
    };

    if input.contains(',') {
        input.split(',').map(token).collect()
    } else if let Some((start, end)) = input.split_once('-') {
        let start = token(start)?;
        let end = token(end)?;
        if start > end {
            return Err(Error::InvertedRange {
                template,
                field,
                start,
                end,
            });
        }
        Ok((start..=end).collect())
    } else if input.is_empty() {
        Ok(vec![0])
    } else {
        Ok(vec![token(input)?])
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rustc_hash::FxHashSet;

    use super::*;

    fn cidr_hosts(template: usize, field: Field, input: &str) -> Result<Vec<Ipv4Addr>, Error> {
        Ok(cidr_block(template, field, input)?
            .values()
            .into_iter()
            .flatten()
            .collect())
    }

    fn template(src_addr: &str, dst_addr: &str, src_port: &str, dst_port: &str, proto: &str) -> Template {
        Template {
            src_addr: src_addr.to_string(),
            src_port: src_port.to_string(),
            dst_addr: dst_addr.to_string(),
            dst_port: dst_port.to_string(),
            proto: proto.to_string(),
            hops: vec!["a".to_string(), "b".to_string()],
            count: 3,
        }
    }

    #[test]
    fn cidr_slash_30_strips_network_and_broadcast() {
        let hosts = cidr_hosts(0, Field::SrcAddr, "10.0.0.0/30").unwrap();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn tiny_cidr_blocks_are_kept_whole() {
        let hosts = cidr_hosts(0, Field::SrcAddr, "10.0.0.7/32").unwrap();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 7)]);

        let hosts = cidr_hosts(0, Field::SrcAddr, "10.0.0.6/31").unwrap();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 6), Ipv4Addr::new(10, 0, 0, 7)]
        );
    }

    #[test]
    fn cidr_host_bits_are_masked() {
        let hosts = cidr_hosts(0, Field::DstAddr, "10.0.0.5/30").unwrap();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]
        );
    }

    #[test]
    fn malformed_cidr_is_reported_with_context() {
        let err = expand(&[template("10.0.0.0/40", "", "", "", "")]).unwrap_err();
        match err {
            Error::Cidr { template, field, .. } => {
                assert_eq!(template, 0);
                assert_eq!(field, Field::SrcAddr);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_address_is_reported() {
        let templates = [template("", "", "", "", ""), template("", "10.0.0", "", "", "")];
        let err = expand(&templates).unwrap_err();
        assert!(matches!(
            err,
            Error::Address {
                template: 1,
                field: Field::DstAddr,
                ..
            }
        ));
    }

    #[test]
    fn port_and_protocol_syntax() {
        assert_eq!(integers(0, Field::SrcPort, "", 65_535).unwrap(), vec![0]);
        assert_eq!(integers(0, Field::SrcPort, "22", 65_535).unwrap(), vec![22]);
        assert_eq!(
            integers(0, Field::SrcPort, "22,80, 443", 65_535).unwrap(),
            vec![22, 80, 443]
        );
        assert_eq!(
            integers(0, Field::SrcPort, "1000-1003", 65_535).unwrap(),
            vec![1000, 1001, 1002, 1003]
        );
    }

    #[test]
    fn bad_integers_are_rejected() {
        assert!(matches!(
            integers(2, Field::DstPort, "http", 65_535),
            Err(Error::Integer { template: 2, field: Field::DstPort, .. })
        ));
        assert!(matches!(
            integers(0, Field::DstPort, "80,x", 65_535),
            Err(Error::Integer { .. })
        ));
        assert!(matches!(
            integers(0, Field::DstPort, "90-80", 65_535),
            Err(Error::InvertedRange { start: 90, end: 80, .. })
        ));
        assert!(matches!(
            integers(0, Field::DstPort, "1-2-3", 65_535),
            Err(Error::Integer { .. })
        ));
        assert!(matches!(
            integers(0, Field::Proto, "256", 255),
            Err(Error::OutOfRange { value: 256, max: 255, .. })
        ));
    }

    #[test]
    fn expanded_flows_inherit_hops_and_count() {
        let flows = expand(&[template("10.0.0.1", "10.0.0.2", "1-2", "", "")]).unwrap();
        assert_eq!(flows.len(), 2);
        for flow in &flows {
            assert_eq!(&*flow.hops, &["a".to_string(), "b".to_string()]);
            assert_eq!(flow.count, 3);
            assert_eq!(flow.dst_port, 0);
            assert_eq!(flow.proto, 0);
        }
    }

    #[test]
    fn flows_are_summed_across_templates() {
        let templates = [
            template("10.0.0.0/29", "", "", "", ""),
            template("", "", "", "", "6,17"),
        ];
        let flows = expand(&templates).unwrap();
        assert_eq!(flows.len(), 6 + 2);
    }

    #[test]
    fn oversized_templates_are_rejected_before_expansion() {
        let err = expand(&[template("10.0.0.0/8", "11.0.0.0/8", "", "", "")]).unwrap_err();
        let hosts = u128::from((1_u32 << 24) - 2);
        assert!(matches!(
            err,
            Error::TooManyFlows { template: 0, count } if count == hosts * hosts
        ));

        let templates = [template("", "", "", "", ""), template("0.0.0.0/0", "", "", "", "")];
        assert!(matches!(
            expand(&templates),
            Err(Error::TooManyFlows { template: 1, count }) if count == u128::from(u32::MAX - 1)
        ));

        // 65536 * 17, just past the limit
        assert!(matches!(
            expand(&[template("", "", "0-65535", "", "0-16")]),
            Err(Error::TooManyFlows { count: 1_114_112, .. })
        ));
    }

    #[test]
    fn largest_block_is_counted_without_materializing() {
        assert_eq!(
            cidr_block(0, Field::SrcAddr, "0.0.0.0/0").unwrap(),
            Addresses::Run {
                first: 1,
                len: (1 << 32) - 2
            }
        );
    }

    fn list(values: &[u16]) -> String {
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    proptest! {
        #[test]
        fn product_cardinality_and_distinctness(
            src_prefix in 28_u8..=32,
            dst_prefix in 29_u8..=32,
            src_ports in proptest::collection::btree_set(1_u16..u16::MAX, 1..4),
            dst_start in 1_u16..60_000,
            dst_len in 0_u16..4,
            protos in proptest::collection::btree_set(1_u16..=255, 1..3),
        ) {
            let src_ports: Vec<u16> = src_ports.into_iter().collect();
            let protos: Vec<u16> = protos.into_iter().collect();
            let src_addr = format!("10.1.0.0/{src_prefix}");
            let dst_addr = format!("10.2.0.0/{dst_prefix}");
            let dst_port = format!("{dst_start}-{}", dst_start + dst_len);

            let a = cidr_hosts(0, Field::SrcAddr, &src_addr).unwrap().len();
            let b = cidr_hosts(0, Field::DstAddr, &dst_addr).unwrap().len();
            // a single-element list has no comma, use the plain form
            let src_port = if src_ports.len() == 1 { src_ports[0].to_string() } else { list(&src_ports) };
            let proto = if protos.len() == 1 { protos[0].to_string() } else { list(&protos) };
            let expected = a * b * src_ports.len() * (usize::from(dst_len) + 1) * protos.len();

            let flows = expand(&[template(&src_addr, &dst_addr, &src_port, &dst_port, &proto)]).unwrap();
            prop_assert_eq!(flows.len(), expected);

            let distinct: FxHashSet<_> = flows
                .iter()
                .map(|f| (f.src_addr, f.dst_addr, f.src_port, f.dst_port, f.proto))
                .collect();
            prop_assert_eq!(distinct.len(), expected);
        }
    }
}
