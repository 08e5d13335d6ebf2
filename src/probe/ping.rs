//! ICMP echo prober with native sockets and a `ping` command fallback.
//!
//! Native sockets run in spawn_blocking so that round-trip timing is not
//! skewed by the async scheduler.

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{PingStats, ProbeError, ProbeOptions, Prober};

const ICMP_HEADER_LEN: usize = 8;
const MAX_PAYLOAD: usize = 65_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP: raw sockets available");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP: unprivileged datagram sockets available");
        return IcmpCapability::Native;
    }
    tracing::info!("ICMP: no socket access, probing with the ping command");
    IcmpCapability::CommandOnly
}

/// Prober backed by the host network stack.
#[derive(Debug, Default, Clone)]
pub struct IcmpProber;

impl IcmpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str, options: &ProbeOptions) -> Result<PingStats, ProbeError> {
        if options.count == 0 {
            return Err(ProbeError::Config("packet count must be positive".to_string()));
        }
        if options.size > MAX_PAYLOAD {
            return Err(ProbeError::Config(format!("packet size {} too large", options.size)));
        }

        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(address, options).await;
        }

        let ip = resolve_address(address).await?;
        let opts = options.clone();
        let result = tokio::task::spawn_blocking(move || run_blocking_round(ip, &opts))
            .await
            .map_err(|e| ProbeError::Network(format!("probe task failed: {}", e)))?;

        match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping of {} not permitted, falling back to command: {}",
                    address,
                    msg
                );
                run_ping_command(address, options).await
            }
            other => other,
        }
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("not permitted") || msg.contains("Permission") || msg.contains("denied")
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("{} did not resolve", address)))
}

/// Open a connected ICMP socket. The flag is true for RAW sockets; DGRAM
/// sockets have the identifier rewritten by the kernel.
fn open_socket(ip: IpAddr) -> Result<(Socket, bool), ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => {
            let socket = Socket::new(domain, Type::DGRAM, Some(protocol))
                .map_err(|e| ProbeError::Network(format!("cannot open ICMP socket: {}", e)))?;
            (socket, false)
        }
    };

    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("cannot connect ICMP socket: {}", e)))?;
    Ok((socket, raw))
}

/// Send `count` echo requests one after another, each allowed an equal share
/// of the overall timeout.
fn run_blocking_round(ip: IpAddr, options: &ProbeOptions) -> Result<PingStats, ProbeError> {
    let (socket, raw) = open_socket(ip)?;
    let identifier: u16 = rand::random();
    let per_packet = options.timeout / options.count;

    let mut rtts = Vec::with_capacity(options.count as usize);
    let mut seen: HashSet<u16> = HashSet::new();
    let mut duplicates = 0u32;
    let mut sent = 0u32;

    for _ in 0..options.count {
        let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let packet = match ip {
            IpAddr::V4(_) => build_echo_request(ECHO_REQUEST_V4, identifier, sequence, options.size),
            IpAddr::V6(_) => build_echo_request(ECHO_REQUEST_V6, identifier, sequence, options.size),
        };

        let start = Instant::now();
        socket.send(&packet).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ProbeError::Network(format!("ICMP not permitted: {}", e))
            } else {
                ProbeError::Network(format!("send failed: {}", e))
            }
        })?;
        sent += 1;

        loop {
            let remaining = per_packet.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| ProbeError::Network(format!("cannot set read timeout: {}", e)))?;

            let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => return Err(ProbeError::Network(format!("Failed to receive: {}", e))),
            };
            let elapsed = start.elapsed();
            // SAFETY: recv initialized `len` bytes
            let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

            let Some((reply_id, reply_seq)) = parse_echo_reply(ip, buf) else {
                continue;
            };
            if raw && reply_id != identifier {
                continue;
            }
            if !seen.insert(reply_seq) {
                duplicates += 1;
                continue;
            }
            if reply_seq == sequence {
                rtts.push(elapsed);
                break;
            }
        }
    }

    Ok(PingStats::from_rtts(sent, &rtts, duplicates))
}

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REPLY_V6: u8 = 129;

/// Build an echo request with `size` payload bytes. The kernel fills in the
/// ICMPv6 checksum, so it is only computed for IPv4.
fn build_echo_request(kind: u8, identifier: u16, sequence: u16, size: usize) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + size];

    packet[0] = kind;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    if size >= 8 {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        packet[8..16].copy_from_slice(&timestamp.to_be_bytes());
    }

    if kind == ECHO_REQUEST_V4 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Identifier and sequence of an echo reply, if `buf` holds one. RAW IPv4
/// sockets deliver the IP header too.
fn parse_echo_reply(ip: IpAddr, buf: &[u8]) -> Option<(u16, u16)> {
    let (offset, reply_type) = match ip {
        IpAddr::V4(_) => {
            let offset = if buf.first().is_some_and(|b| b >> 4 == 4) {
                usize::from(buf[0] & 0x0f) * 4
            } else {
                0
            };
            (offset, ECHO_REPLY_V4)
        }
        IpAddr::V6(_) => (0, ECHO_REPLY_V6),
    };

    let icmp = buf.get(offset..offset + ICMP_HEADER_LEN)?;
    if icmp[0] != reply_type {
        return None;
    }
    Some((
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run the system `ping` binary (fallback).
async fn run_ping_command(address: &str, options: &ProbeOptions) -> Result<PingStats, ProbeError> {
    let deadline_secs = options.timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args([
            "-c",
            &options.count.to_string(),
            "-s",
            &options.size.to_string(),
            "-w",
            &deadline_secs.to_string(),
            address,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    // ping exits non-zero on total loss but still prints its summary
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_ping_output(&stdout) {
        Ok(stats) => Ok(stats),
        Err(e) if output.status.success() => Err(e),
        Err(_) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProbeError::Command(format!("ping failed: {}", stderr.trim())))
        }
    }
}

/// Parse the summary printed by `ping` (Linux and BSD formats).
fn parse_ping_output(output: &str) -> Result<PingStats, ProbeError> {
    static COUNTS: OnceLock<Regex> = OnceLock::new();
    let counts = COUNTS.get_or_init(|| {
        Regex::new(
            r"(?P<sent>\d+) packets transmitted, (?P<recv>\d+) (?:packets )?received(?:, \+(?P<dup>\d+) duplicates)?(?:, \+\d+ \w+)*, (?P<loss>[0-9.]+)% packet loss",
        )
        .expect("valid regex")
    });

    static RTT: OnceLock<Regex> = OnceLock::new();
    let rtt = RTT.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = (?P<min>[0-9.]+)/(?P<avg>[0-9.]+)/(?P<max>[0-9.]+)/(?P<dev>[0-9.]+) ms",
        )
        .expect("valid regex")
    });

    let caps = counts.captures(output).ok_or_else(|| {
        ProbeError::Command(format!("failed to parse ping output: {}", output))
    })?;
    let number = |name: &str| -> u32 {
        caps.name(name)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let mut stats = PingStats {
        sent: number("sent"),
        received: number("recv"),
        duplicates: number("dup"),
        packet_loss: caps
            .name("loss")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(100.0),
        ..Default::default()
    };

    if stats.received > 0 {
        let caps = rtt.captures(output).ok_or_else(|| {
            ProbeError::Command(format!("missing rtt summary in ping output: {}", output))
        })?;
        let ms = |name: &str| -> Duration {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .map(|v| Duration::from_secs_f64(v / 1000.0))
                .unwrap_or_default()
        };
        stats.min_rtt = ms("min");
        stats.avg_rtt = ms("avg");
        stats.max_rtt = ms("max");
        stats.stddev_rtt = ms("dev");
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_icmp_checksum() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[4] = 0x12;
        packet[5] = 0x34;
        packet[7] = 0x01;

        let checksum = icmp_checksum(&packet);
        assert_eq!(checksum, !0x1A35u16);

        // A packet carrying its own checksum sums to zero
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request_payload_size() {
        let packet = build_echo_request(ECHO_REQUEST_V4, 0x1234, 0x0001, 56);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
        assert_eq!(icmp_checksum(&packet), 0);

        let small = build_echo_request(ECHO_REQUEST_V6, 1, 2, 4);
        assert_eq!(small.len(), 12);
        assert_eq!(small[0], 128);
        assert_eq!(small[2..4], [0, 0]);
    }

    #[test]
    fn test_parse_echo_reply() {
        let v4 = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut reply = vec![0u8; 8];
        reply[4..6].copy_from_slice(&7u16.to_be_bytes());
        reply[6..8].copy_from_slice(&9u16.to_be_bytes());
        assert_eq!(parse_echo_reply(v4, &reply), Some((7, 9)));

        // With a 20 byte IPv4 header in front
        let mut raw = vec![0u8; 20];
        raw[0] = 0x45;
        raw.extend_from_slice(&reply);
        assert_eq!(parse_echo_reply(v4, &raw), Some((7, 9)));

        // Echo requests are not replies
        reply[0] = 8;
        assert_eq!(parse_echo_reply(v4, &reply), None);

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        reply[0] = 129;
        assert_eq!(parse_echo_reply(v6, &reply), Some((7, 9)));
        assert_eq!(parse_echo_reply(v6, &reply[..4]), None);
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = r#"PING 198.51.100.7 (198.51.100.7) 56(84) bytes of data.
64 bytes from 198.51.100.7: icmp_seq=1 ttl=117 time=12.3 ms
64 bytes from 198.51.100.7: icmp_seq=2 ttl=117 time=14.1 ms

--- 198.51.100.7 ping statistics ---
3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms
rtt min/avg/max/mdev = 12.300/13.200/14.100/0.900 ms"#;
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.duplicates, 0);
        assert!((stats.packet_loss - 33.3333).abs() < 1e-6);
        assert!((stats.avg_rtt.as_secs_f64() * 1000.0 - 13.2).abs() < 1e-6);
        assert!((stats.stddev_rtt.as_secs_f64() * 1000.0 - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_duplicates() {
        let output = "3 packets transmitted, 3 received, +1 duplicates, 0% packet loss, time 2002ms\n\
                      rtt min/avg/max/mdev = 1.000/2.000/3.000/0.816 ms";
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING gw.example.net (203.0.113.9): 56 data bytes

--- gw.example.net ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.received, 1);
        assert!((stats.avg_rtt.as_secs_f64() * 1000.0 - 17.906).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_total_loss() {
        let output = "3 packets transmitted, 0 received, 100% packet loss, time 2040ms";
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.packet_loss, 100.0);

        assert!(parse_ping_output("ping: unknown host").is_err());
    }
}
