//! Raw frame source and per-interface ingress loop.
//!
//! One `FrameSock` per interface: an AF_PACKET/SOCK_RAW socket bound to the
//! interface, promiscuous, with a kernel filter that admits only frames
//! whose destination has the group bit set (broadcast + multicast). The
//! ingress loop drains it on a blocking thread with a 1 s read deadline so
//! cancellation is observed even on a quiet link; a socket-breaker task
//! closes the fd on shutdown to interrupt an in-progress read.

use std::io;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::detector::{Engine, IfaceContext};
use crate::mac_class;
use crate::notifier::Notifier;
use crate::telemetry;

/// Read deadline so the blocking loop can observe cancellation.
const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Kernel statistics, accumulated across `PACKET_STATISTICS` reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SockStats {
    pub packets: u64,
    pub drops: u64,
}

/// Promiscuous AF_PACKET socket for one interface.
///
/// The fd lives in an atomic so any thread can close it to break a blocking
/// read; after `close` every operation fails with `EBADF` and the ingress
/// loop exits cleanly.
pub struct FrameSock {
    fd: AtomicI32,
    iface: String,
    hw_addr: [u8; 6],
    // The kernel resets PACKET_STATISTICS on every read; keep running
    // totals so callers can do delta arithmetic.
    total_packets: AtomicU64,
    total_drops: AtomicU64,
}

impl FrameSock {
    /// Open, bind, set promiscuous, apply the group-bit filter and the read
    /// deadline. Requires CAP_NET_RAW.
    pub fn open(iface: &str, snaplen: usize) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if fd < 0 {
            bail!(
                "[{iface}] failed to open raw socket: {} (CAP_NET_RAW required)",
                io::Error::last_os_error()
            );
        }

        // Constructed before the fallible setup below so the fd is closed
        // by Drop on any early return.
        let mut sock = Self {
            fd: AtomicI32::new(fd),
            iface: iface.to_string(),
            hw_addr: [0; 6],
            total_packets: AtomicU64::new(0),
            total_drops: AtomicU64::new(0),
        };

        let ifindex = if_index(iface).with_context(|| format!("interface {iface} not found"))?;

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = ifindex;
        let rc = unsafe {
            libc::bind(
                fd,
                &sll as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            bail!(
                "[{iface}] failed to bind raw socket: {}",
                io::Error::last_os_error()
            );
        }

        // Promiscuous failure is a warning, not fatal
        let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
        mreq.mr_ifindex = ifindex;
        mreq.mr_type = libc::PACKET_MR_PROMISC as u16;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            warn!(
                "[{iface}] failed to set promiscuous mode: {}",
                io::Error::last_os_error()
            );
        }

        let tv = libc::timeval {
            tv_sec: READ_DEADLINE.as_secs() as libc::time_t,
            tv_usec: 0,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            bail!(
                "[{iface}] failed to set read deadline: {}",
                io::Error::last_os_error()
            );
        }

        attach_group_bit_filter(fd, snaplen as u32)
            .with_context(|| format!("[{iface}] failed to apply BPF filter"))?;

        sock.hw_addr =
            read_hw_addr(iface).with_context(|| format!("[{iface}] failed to read MAC"))?;

        Ok(sock)
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn hw_addr(&self) -> [u8; 6] {
        self.hw_addr
    }

    /// Blocking read honouring the 1 s deadline (EAGAIN on timeout).
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Transmit a complete Ethernet frame through the bound interface.
    pub fn send(&self, frame: &[u8]) -> io::Result<()> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let n = unsafe { libc::send(fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Cumulative kernel receive/drop counters.
    pub fn stats(&self) -> io::Result<SockStats> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut st: libc::tpacket_stats = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::tpacket_stats>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_STATISTICS,
                &mut st as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let packets = self
            .total_packets
            .fetch_add(st.tp_packets as u64, Ordering::Relaxed)
            + st.tp_packets as u64;
        let drops = self
            .total_drops
            .fetch_add(st.tp_drops as u64, Ordering::Relaxed)
            + st.tp_drops as u64;
        Ok(SockStats { packets, drops })
    }

    /// Close the fd; breaks any blocking read from another thread.
    pub fn close(&self) {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl Drop for FrameSock {
    fn drop(&mut self) {
        self.close();
    }
}

fn if_index(iface: &str) -> Result<i32> {
    let name = std::ffi::CString::new(iface)?;
    let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if idx == 0 {
        bail!("{}", io::Error::last_os_error());
    }
    Ok(idx as i32)
}

fn read_hw_addr(iface: &str) -> Result<[u8; 6]> {
    let path = format!("/sys/class/net/{iface}/address");
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    mac_class::parse_mac(text.trim())
        .ok_or_else(|| anyhow::anyhow!("malformed MAC in {path}: {:?}", text.trim()))
}

/// Classic BPF equivalent of: accept iff (frame[0] & 0x01) == 1, returning
/// up to `snaplen` bytes, else 0.
fn group_bit_program(snaplen: u32) -> [libc::sock_filter; 5] {
    [
        // ldb [0]
        libc::sock_filter { code: 0x30, jt: 0, jf: 0, k: 0 },
        // and #1
        libc::sock_filter { code: 0x54, jt: 0, jf: 0, k: 1 },
        // jeq #0 ? drop : accept
        libc::sock_filter { code: 0x15, jt: 1, jf: 0, k: 0 },
        // ret #snaplen
        libc::sock_filter { code: 0x06, jt: 0, jf: 0, k: snaplen },
        // ret #0
        libc::sock_filter { code: 0x06, jt: 0, jf: 0, k: 0 },
    ]
}

fn attach_group_bit_filter(fd: i32, snaplen: u32) -> Result<()> {
    let mut prog = group_bit_program(snaplen);
    let fprog = libc::sock_fprog {
        len: prog.len() as u16,
        filter: prog.as_mut_ptr(),
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &fprog as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        bail!("{}", io::Error::last_os_error());
    }
    Ok(())
}

/// Extract the 802.1Q VLAN id; 0 when untagged or too short.
pub fn extract_vlan(data: &[u8]) -> u16 {
    if data.len() >= 18 && u16::from_be_bytes([data[12], data[13]]) == 0x8100 {
        u16::from_be_bytes([data[14], data[15]]) & 0x0fff
    } else {
        0
    }
}

/// Run the full per-interface stack: open the socket, start the detectors,
/// spawn the drop sampler and the socket breaker, then drive the blocking
/// ingress loop until cancellation.
///
/// Startup errors propagate so the supervisor can record which interface
/// stacks died; per-frame errors never leave the loop.
pub async fn run(
    shutdown: CancellationToken,
    iface: &str,
    cfg: &Config,
    notify: Arc<Notifier>,
) -> Result<()> {
    let snaplen = cfg.network.snaplen.max(64);
    let sock = Arc::new(FrameSock::open(iface, snaplen)?);

    let ctx = IfaceContext {
        name: iface.to_string(),
        hw_addr: sock.hw_addr(),
        snaplen,
    };

    let engine = Arc::new(Engine::new(&cfg.algorithms, notify, &ctx));
    engine.start_all(&sock, &shutdown);

    info!("[{iface}] sniffer active [BPF active]");

    tokio::spawn(drop_sampler(sock.clone(), shutdown.clone()));

    // Socket breaker: the read deadline alone may leave ingress dangling on
    // a quiet link, so shutdown also closes the fd under the read.
    {
        let sock = sock.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            sock.close();
        });
    }

    let loop_sock = sock.clone();
    let loop_shutdown = shutdown.clone();
    tokio::task::spawn_blocking(move || ingress_loop(loop_sock, engine, loop_shutdown, snaplen))
        .await
        .context("ingress loop panicked")?
}

fn ingress_loop(
    sock: Arc<FrameSock>,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    snaplen: usize,
) -> Result<()> {
    let iface = sock.iface().to_string();
    let mut buf = vec![0u8; snaplen];

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let n = match sock.recv(&mut buf) {
            Ok(n) => n,
            Err(e) => match e.raw_os_error() {
                // Read deadline: re-check cancellation and retry
                Some(libc::EAGAIN) | Some(libc::EINTR) => continue,
                // Socket breaker fired
                Some(libc::EBADF) | Some(libc::ENOTSOCK) => return Ok(()),
                _ => {
                    warn!("[{iface}] read error: {e}");
                    continue;
                }
            },
        };
        if n < 14 {
            continue;
        }

        let started = Instant::now();

        telemetry::track_frame(&buf[..n]);
        let vlan_id = extract_vlan(&buf[..n]);

        engine.dispatch(&buf[..n], n, vlan_id);

        telemetry::observe_processing(&iface, started.elapsed().as_nanos() as u64);
    }
}

/// Every 5 s, surface the kernel drop delta as telemetry; warn loudly when
/// the sensor is going blind under a storm.
async fn drop_sampler(sock: Arc<FrameSock>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_drops: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                let Ok(stats) = sock.stats() else { return };
                if stats.drops > last_drops {
                    let delta = stats.drops - last_drops;
                    telemetry::add_socket_drops(sock.iface(), delta);
                    if delta > 100 {
                        warn!("[{}] kernel drops: {} packets lost", sock.iface(), delta);
                    }
                    last_drops = stats.drops;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_vlan() {
        // Untagged IPv4 frame
        let mut frame = vec![0u8; 60];
        frame[12] = 0x08;
        frame[13] = 0x00;
        assert_eq!(extract_vlan(&frame), 0);

        // Tagged, VLAN 10 (TPID 0x8100, TCI 0x000A)
        frame[12] = 0x81;
        frame[13] = 0x00;
        frame[14] = 0x00;
        frame[15] = 0x0a;
        assert_eq!(extract_vlan(&frame), 10);

        // Priority bits must be masked off: TCI 0xE00A is still VLAN 10
        frame[14] = 0xe0;
        assert_eq!(extract_vlan(&frame), 10);

        // Too short to carry a tag
        assert_eq!(extract_vlan(&frame[..16]), 0);
    }

    #[test]
    fn test_group_bit_program_shape() {
        let prog = group_bit_program(2048);
        assert_eq!(prog.len(), 5);
        // ldb [0]
        assert_eq!(prog[0].code, 0x30);
        assert_eq!(prog[0].k, 0);
        // and #1
        assert_eq!(prog[1].code, 0x54);
        assert_eq!(prog[1].k, 1);
        // conditional jump skips the accept on A == 0
        assert_eq!(prog[2].code, 0x15);
        assert_eq!(prog[2].jt, 1);
        // accept returns snaplen, reject returns 0
        assert_eq!(prog[3].code, 0x06);
        assert_eq!(prog[3].k, 2048);
        assert_eq!(prog[4].code, 0x06);
        assert_eq!(prog[4].k, 0);
    }

    #[test]
    fn test_open_unknown_interface_fails() {
        // Fails with ENODEV when privileged, EPERM otherwise; either way
        // the caller sees an error, never a half-open socket.
        let res = FrameSock::open("lw-test-does-not-exist", 2048);
        assert!(res.is_err());
    }
}
