//! Object existence from introspection data.
//!
//! A bus object is considered present when its parent's introspection XML
//! lists it as a child `<node name="..."/>`.

use regex::Regex;

use crate::error::IpcError;

/// Introspection replies this short carry no child nodes worth looking at;
/// the service is probably still populating its tree.
pub const MIN_INTROSPECTION_LEN: usize = 218;

/// Split an object path into the parent to introspect and the child name.
///
/// `/` yields `("/", "")`.
pub fn split_object_path(path: &str) -> Result<(&str, &str), IpcError> {
    let Some(split) = path.rfind('/') else {
        return Err(IpcError::Decode(format!(
            "invalid object path '{path}': no separator found"
        )));
    };
    let (parent, child) = (&path[..split], &path[split + 1..]);

    if !parent.is_empty() && child.is_empty() {
        return Err(IpcError::Decode(format!(
            "invalid object path '{path}': trailing '/' not allowed"
        )));
    }
    Ok((if parent.is_empty() { "/" } else { parent }, child))
}

/// Whether `xml` (introspection of `parent`) shows `child` as present.
pub fn lists_child(xml: &str, parent: &str, child: &str) -> bool {
    if child.is_empty() {
        return parent == "/" && xml.len() > MIN_INTROSPECTION_LEN;
    }
    let pattern = format!(r#"<node name="({})"\s*/>"#, regex::escape(child));
    Regex::new(&pattern).is_ok_and(|re| {
        re.captures(xml)
            .and_then(|caps| caps.get(1))
            .is_some_and(|name| name.as_str() == child)
    })
}
