//! `SyscallNumberTable` for x86_64 Linux — §4.8.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::analyzer::SyscallInfo;

/// Network-capable syscalls worth flagging regardless of architecture.
const NETWORK_SYSCALLS: &[(i64, &str)] = &[
    (41, "socket"),
    (53, "socketpair"),
    (49, "bind"),
    (50, "listen"),
    (43, "accept"),
    (288, "accept4"),
    (42, "connect"),
    (44, "sendto"),
    (45, "recvfrom"),
    (46, "sendmsg"),
    (47, "recvmsg"),
    (307, "sendmmsg"),
    (299, "recvmmsg"),
];

/// A sample of commonly seen non-network syscalls, enough to give `name`
/// something better than `"unknown"` for typical binaries.
const OTHER_SYSCALLS: &[(i64, &str)] = &[
    (0, "read"),
    (1, "write"),
    (2, "open"),
    (3, "close"),
    (9, "mmap"),
    (10, "mprotect"),
    (11, "munmap"),
    (12, "brk"),
    (21, "access"),
    (22, "pipe"),
    (39, "getpid"),
    (56, "clone"),
    (57, "fork"),
    (59, "execve"),
    (60, "exit"),
    (61, "wait4"),
    (62, "kill"),
    (72, "fcntl"),
    (79, "getcwd"),
    (158, "arch_prctl"),
    (231, "exit_group"),
    (257, "openat"),
    (273, "set_robust_list"),
    (302, "prlimit64"),
    (318, "getrandom"),
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

/// Resolve a syscall number to its name and network-capability flag.
/// Unknown numbers yield `name = "unknown"`; the caller marks the whole
/// binary high-risk when this happens.
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
        let info = lookup(42);
        assert_eq!(info.name, "connect");
        assert!(info.is_network);
    }

    #[test]
    fn resolves_known_non_network_syscall() {
        let info = lookup(59);
        assert_eq!(info.name, "execve");
        assert!(!info.is_network);
    }

    #[test]
    fn unknown_number_is_unknown_and_not_network() {
        let info = lookup(999_999);
        assert_eq!(info.name, "unknown");
        assert!(!info.is_network);
    }
}
