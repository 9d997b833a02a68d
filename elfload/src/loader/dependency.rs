use goblin::elf::{
    dynamic,
    program_header,
    section_header,
};

use crate::loader::{
    error::{
        LoadWarning,
        LoaderError,
    },
    image::LoadedImage,
    tables::Tables,
};

fn is_needed(tag: u32) -> bool {
    tag as u64 == dynamic::DT_NEEDED
}

/// Names of the shared libraries this image depends on, in file order.
///
/// Images without a dynamic section yield an empty list.
pub(crate) fn get_dependencies(tables: &Tables, image: &LoadedImage, warnings: &mut Vec<LoadWarning>) -> Result<Vec<String>, LoaderError> {
    let mut ret = Vec::<String>::new();

    let section = tables
        .section_headers()
        .iter()
        .position(|s| s.sh_type == section_header::SHT_DYNAMIC);

    if let Some(index) = section {
        let entries = tables.dynamic_entries(index)?;
        let link = tables.section_headers()[index].link as usize;
        let strtab = tables.strtab(link)?;

        for (tag, val) in entries {
            if !is_needed(tag) {
                continue;
            }

            match strtab.get(val) {
                Some(name) => ret.push(name.into_owned()),
                None => warnings.push(LoadWarning::DanglingDynamicString(val)),
            }
        }

        return Ok(ret);
    }

    /* Stripped section headers: go through the segment and the loaded image */
    let Some(phdr) = tables.program_headers().iter().find(|p| p.p_type == program_header::PT_DYNAMIC) else {
        return Ok(ret);
    };

    let entries = tables.dynamic_entries_at(phdr.offset, phdr.filesz)?;
    let strtab = entries.iter().find(|(tag, _)| *tag as u64 == dynamic::DT_STRTAB).map(|(_, val)| *val);
    let strsz = entries.iter().find(|(tag, _)| *tag as u64 == dynamic::DT_STRSZ).map(|(_, val)| *val);

    let (Some(strtab), Some(strsz)) = (strtab, strsz) else {
        return Ok(ret);
    };

    let limit = strtab.saturating_add(strsz);

    for (tag, val) in entries {
        if !is_needed(tag) {
            continue;
        }

        let name = if val < strsz { image.read_str(strtab.wrapping_add(val), limit) } else { None };

        match name {
            Some(name) => ret.push(name.to_string()),
            None => warnings.push(LoadWarning::DanglingDynamicString(val)),
        }
    }

    Ok(ret)
}
