/// A single classic BPF instruction, laid out as the kernel's `sock_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Instruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl Instruction {
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        Self { code, jt, jf, k }
    }
}

// BPF_RET | BPF_K
const RET_K: u16 = 0x06;

/// A compiled packet filter program, passed to the kernel verbatim.
///
/// The program is usually produced by an external filter compiler; no
/// validation happens here, the kernel rejects malformed programs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FilterProgram {
    instructions: Vec<Instruction>,
}

impl FilterProgram {
    pub fn new(instructions: impl Into<Vec<Instruction>>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// A program that admits every frame in full.
    pub fn accept_all() -> Self {
        Self::new([Instruction::new(RET_K, 0, 0, u32::MAX)])
    }

    /// A program that drops every frame.
    pub fn reject_all() -> Self {
        Self::new([Instruction::new(RET_K, 0, 0, 0)])
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn to_sock_filters(&self) -> Vec<libc::sock_filter> {
        self.instructions
            .iter()
            .map(|i| libc::sock_filter {
                code: i.code,
                jt: i.jt,
                jf: i.jf,
                k: i.k,
            })
            .collect()
    }
}

impl FromIterator<Instruction> for FilterProgram {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self {
            instructions: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn sock_filter_layout() {
        assert_eq!(std::mem::size_of::<libc::sock_filter>(), 8);

        // tcpdump -dd "ether proto 0x88f7"
        let program: FilterProgram = [
            Instruction::new(0x28, 0, 0, 0x0000000c),
            Instruction::new(0x15, 0, 1, 0x000088f7),
            Instruction::new(0x06, 0, 0, 0x00040000),
            Instruction::new(0x06, 0, 0, 0x00000000),
        ]
        .into_iter()
        .collect();

        let filters = program.to_sock_filters();
        assert_eq!(filters.len(), 4);
        assert_eq!(filters[1].code, 0x15);
        assert_eq!(filters[1].jt, 0);
        assert_eq!(filters[1].jf, 1);
        assert_eq!(filters[1].k, 0x88f7);
    }

    #[test]
    fn canned_programs() {
        assert_eq!(FilterProgram::accept_all().instructions()[0].k, u32::MAX);
        assert_eq!(FilterProgram::reject_all().instructions()[0].k, 0);
        assert!(FilterProgram::default().is_empty());
    }
}
