use goblin::elf::{
    program_header,
    section_header,
};

const PERM_X: u8 = 1;
const PERM_W: u8 = 2;
const PERM_R: u8 = 4;

/// The permissions of segments and sections in the loaded image
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Hash)]
pub struct Perms(u8);

impl Perms {
    pub(crate) fn from_segment_flags(flags: u32) -> Self {
        let mut perms = Perms(0);

        if (flags & program_header::PF_X) != 0 {
            perms.make_executable();
        }

        if (flags & program_header::PF_W) != 0 {
            perms.make_writable();
        }

        if (flags & program_header::PF_R) != 0 {
            perms.make_readable();
        }

        perms
    }

    pub(crate) fn from_section_flags(flags: u32) -> Self {
        let mut perms = Perms(0);
        perms.make_readable();

        if (flags & section_header::SHF_EXECINSTR) != 0 {
            perms.make_executable();
        }

        if (flags & section_header::SHF_WRITE) != 0 {
            perms.make_writable();
        }

        perms
    }

    #[allow(missing_docs)]
    pub fn is_executable(&self) -> bool {
        (self.0 & PERM_X) != 0
    }

    #[allow(missing_docs)]
    pub fn is_writable(&self) -> bool {
        (self.0 & PERM_W) != 0
    }

    #[allow(missing_docs)]
    pub fn is_readable(&self) -> bool {
        (self.0 & PERM_R) != 0
    }

    #[allow(missing_docs)]
    pub fn make_executable(&mut self) {
        self.0 |= PERM_X
    }

    #[allow(missing_docs)]
    pub fn make_readable(&mut self) {
        self.0 |= PERM_R
    }

    #[allow(missing_docs)]
    pub fn make_writable(&mut self) {
        self.0 |= PERM_W
    }
}

impl std::fmt::Display for Perms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.is_readable() { "r" } else { "-" };
        let w = if self.is_writable() { "w" } else { "-" };
        let x = if self.is_executable() { "x" } else { "-" };
        write!(f, "{}{}{}", r, w, x)
    }
}

#[cfg(test)]
#[test]
fn test_perms() {
    let perms = Perms::from_segment_flags(program_header::PF_R | program_header::PF_X);
    assert_eq!(perms.to_string(), "r-x");

    let perms = Perms::from_section_flags(section_header::SHF_ALLOC | section_header::SHF_WRITE);
    assert_eq!(perms.to_string(), "rw-");
}
