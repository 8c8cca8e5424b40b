//! AF_PACKET socket backend

use super::Capture;
use crate::protocol::ethernet::MAX_FRAME_SIZE;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info};

/// Raw socket bound to one kernel interface
pub struct AfPacketSocket {
    fd: RawFd,
    ifindex: i32,
    hwaddr: MacAddr,
    promisc: bool,
}

impl AfPacketSocket {
    /// Opens a socket bound to `ifname`.
    pub fn bind(ifname: &str, promisc: bool) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let ifr = match Self::ifreq(ifname) {
            Ok(ifr) => ifr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let setup = Self::query_ifindex(fd, ifr, ifname).and_then(|ifindex| {
            let hwaddr = Self::read_hwaddr(fd, ifr, ifname)?;
            Self::bind_ifindex(fd, ifindex)?;
            if promisc {
                Self::set_promisc(fd, ifindex, true)?;
            }
            Ok((ifindex, hwaddr))
        });
        let (ifindex, hwaddr) = match setup {
            Ok(v) => v,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        info!(
            "Bound AF_PACKET on {} (ifindex {}, {}{})",
            ifname,
            ifindex,
            hwaddr,
            if promisc { ", promiscuous" } else { "" }
        );

        Ok(Self {
            fd,
            ifindex,
            hwaddr,
            promisc,
        })
    }

    fn ifreq(ifname: &str) -> Result<libc::ifreq> {
        let ifname_c = CString::new(ifname)
            .map_err(|_| Error::Config(format!("interface name {:?} contains a nul byte", ifname)))?;
        let name_bytes = ifname_c.as_bytes_with_nul();

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(Error::Config(format!(
                "interface name {} is longer than {} bytes",
                ifname,
                ifr.ifr_name.len() - 1
            )));
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(ifr)
    }

    fn query_ifindex(fd: RawFd, mut ifr: libc::ifreq, ifname: &str) -> Result<i32> {
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn read_hwaddr(fd: RawFd, mut ifr: libc::ifreq, ifname: &str) -> Result<MacAddr> {
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut ifr) };
        if ret < 0 {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }
        let data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    fn bind_ifindex(fd: RawFd, ifindex: i32) -> Result<()> {
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

}

impl Capture for AfPacketSocket {
    fn rx_burst(&self, max: usize) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        while frames.len() < max {
            let mut buf = vec![0u8; MAX_FRAME_SIZE];
            let n = unsafe {
                libc::recv(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    break;
                }
                return Err(Error::Io(err));
            }
            buf.truncate(n as usize);
            frames.push(buf);
        }
        Ok(frames)
    }

    fn tx_burst(&self, frames: Vec<Vec<u8>>) -> Result<usize> {
        let mut sent = 0;
        for frame in &frames {
            let n = unsafe {
                libc::send(
                    self.fd,
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    debug!("TX queue full on ifindex {}", self.ifindex);
                    break;
                }
                return Err(Error::Io(err));
            }
            sent += 1;
        }
        Ok(sent)
    }

    fn hwaddr(&self) -> MacAddr {
        self.hwaddr
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        if self.promisc {
            let _ = Self::set_promisc(self.fd, self.ifindex, false);
        }
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_copies_name() {
        let ifr = AfPacketSocket::ifreq("eth0").unwrap();
        let name: Vec<u8> = ifr.ifr_name.iter().take(5).map(|c| *c as u8).collect();
        assert_eq!(name, b"eth0\0");
    }

    #[test]
    fn test_ifreq_rejects_long_name() {
        let err = AfPacketSocket::ifreq("an-interface-name-far-too-long").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ifreq_rejects_nul_byte() {
        let err = AfPacketSocket::ifreq("eth\00").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bind_missing_interface_fails() {
        // Fails with EPERM when unprivileged, otherwise on the index lookup
        assert!(AfPacketSocket::bind("dtfwd-none0", false).is_err());
    }
}
