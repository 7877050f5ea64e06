//! `SyscallNumberTable` for aarch64 Linux — §4.8.
//!
//! aarch64 uses the "generic" Linux syscall numbering table, which differs
//! from x86_64's historical numbering for many calls (no `open`, different
//! network-syscall numbers, etc).

use std::collections::HashMap;
use std::sync::OnceLock;

use super::analyzer::SyscallInfo;

const NETWORK_SYSCALLS: &[(i64, &str)] = &[
    (198, "socket"),
    (199, "socketpair"),
    (200, "bind"),
    (201, "listen"),
    (202, "accept"),
    (242, "accept4"),
    (203, "connect"),
    (206, "sendto"),
    (207, "recvfrom"),
    (211, "sendmsg"),
    (212, "recvmsg"),
    (269, "sendmmsg"),
    (243, "recvmmsg"),
];

const OTHER_SYSCALLS: &[(i64, &str)] = &[
    (63, "read"),
    (64, "write"),
    (57, "close"),
    (222, "mmap"),
    (226, "mprotect"),
    (215, "munmap"),
    (214, "brk"),
    (172, "getpid"),
    (220, "clone"),
    (221, "execve"),
    (93, "exit"),
    (260, "wait4"),
    (129, "kill"),
    (25, "fcntl"),
    (17, "getcwd"),
    (94, "exit_group"),
    (56, "openat"),
    (99, "set_robust_list"),
    (261, "prlimit64"),
    (278, "getrandom"),
];

fn table() -> &'static HashMap<i64, SyscallInfo> {
    static TABLE: OnceLock<HashMap<i64, SyscallInfo>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for &(num, name) in NETWORK_SYSCALLS {
            map.insert(
                num,
                SyscallInfo {
                    name: name.to_string(),
                    is_network: true,
                },
            );
        }
        for &(num, name) in OTHER_SYSCALLS {
            map.insert(
                num,
                SyscallInfo {
                    name: name.to_string(),
                    is_network: false,
                },
            );
        }
        map
    })
}

#[must_use]
pub fn lookup(number: i64) -> SyscallInfo {
    table().get(&number).cloned().unwrap_or(SyscallInfo {
        name: "unknown".to_string(),
        is_network: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_network_syscall() {
        let info = lookup(203);
        assert_eq!(info.name, "connect");
        assert!(info.is_network);
    }

    #[test]
    fn unknown_number_is_unknown() {
        let info = lookup(999_999);
        assert_eq!(info.name, "unknown");
        assert!(!info.is_network);
    }
}
