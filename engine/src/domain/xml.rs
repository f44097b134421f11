//! Valuation document parsing and response assembly.
//!
//! Parses the submitted XML into an ordered list of groups, each carrying an
//! ordered list of tasks, and assembles the final response XML from task
//! results in group/task order. Hydration (resolving `ref`/`href` references
//! inside a task fragment) is a separate concern, see [`super::hydration`].

use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use uuid::Uuid;

use crate::error::EngineError;

/// One task inside a group, as it appeared in the submitted document.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    /// The task element, verbatim (attributes and children preserved), for
    /// hydration to operate on.
    pub fragment_xml: String,
}

/// One group inside the document, in document order.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: Option<String>,
    pub tasks: Vec<TaskSpec>,
}

/// Parse groups and tasks out of a submitted valuation document.
///
/// Recognizes any `<group>` element (optionally named via a `name`
/// attribute) containing one or more `<t id="...">` task elements; the
/// surrounding document structure (e.g. `<vnml><project>...`) is otherwise
/// ignored. Returns `EngineError::InvalidInput` for malformed XML, a
/// document with no groups, or a task missing its `id` attribute.
pub fn parse_groups(xml: &str) -> Result<Vec<GroupSpec>, EngineError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;

    let mut groups = Vec::new();
    let mut current_group: Option<GroupSpec> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| EngineError::invalid_input(format!("malformed xml: {e}")))?;
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"group" => {
                let name = attr_value(&e, b"name");
                current_group = Some(GroupSpec {
                    name,
                    tasks: Vec::new(),
                });
            }
            Event::End(e) if e.local_name().as_ref() == b"group" => {
                if let Some(group) = current_group.take() {
                    groups.push(group);
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"t" => {
                let id = task_id(&e)?;
                let fragment_xml = render_single(Event::Empty(e))?;
                add_task(&mut current_group, id, fragment_xml)?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                let id = task_id(&e)?;
                let fragment_xml = capture_subtree(&mut reader, &e)?;
                add_task(&mut current_group, id, fragment_xml)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if groups.is_empty() {
        return Err(EngineError::invalid_input("document contains no groups"));
    }
    Ok(groups)
}

fn task_id(e: &BytesStart) -> Result<String, EngineError> {
    attr_value(e, b"id")
        .ok_or_else(|| EngineError::invalid_input("task element missing required 'id' attribute"))
}

fn add_task(
    current_group: &mut Option<GroupSpec>,
    id: String,
    fragment_xml: String,
) -> Result<(), EngineError> {
    match current_group {
        Some(group) => {
            group.tasks.push(TaskSpec { id, fragment_xml });
            Ok(())
        }
        None => Err(EngineError::invalid_input("task element outside of a group")),
    }
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Re-serialize a start tag and everything up to (and including) its
/// matching end tag, preserving the original document bytes as closely as
/// quick-xml's event model allows.
fn capture_subtree(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<String, EngineError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_event(&mut writer, Event::Start(start.clone()))?;

    let name = start.name().as_ref().to_vec();
    let mut depth = 1u32;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| EngineError::invalid_input(format!("malformed xml: {e}")))?;
        match &event {
            Event::Start(s) if s.name().as_ref() == name.as_slice() => depth += 1,
            Event::End(e) if e.name().as_ref() == name.as_slice() => depth -= 1,
            Event::Eof => {
                return Err(EngineError::invalid_input(
                    "unexpected end of document inside task element",
                ));
            }
            _ => {}
        }
        let closed = depth == 0;
        write_event(&mut writer, event)?;
        if closed {
            break;
        }
    }

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| EngineError::invalid_input(format!("xml fragment not utf8: {e}")))
}

fn render_single(event: Event) -> Result<String, EngineError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_event(&mut writer, event)?;
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| EngineError::invalid_input(format!("xml fragment not utf8: {e}")))
}

fn write_event(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event) -> Result<(), EngineError> {
    writer
        .write_event(event)
        .map_err(|e| EngineError::invalid_input(format!("xml serialization failed: {e}")))
}

/// Assemble the final response document from per-group, per-task results in
/// document order.
pub fn build_response(
    request_id: Uuid,
    groups: &[(u32, Vec<(String, String)>)],
) -> Result<String, EngineError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut root = BytesStart::new("valuationResponse");
    root.push_attribute(("requestId", request_id.to_string().as_str()));
    write_event(&mut writer, Event::Start(root))?;

    for (group_idx, tasks) in groups {
        let mut group_start = BytesStart::new("group");
        let index = group_idx.to_string();
        group_start.push_attribute(("index", index.as_str()));
        write_event(&mut writer, Event::Start(group_start))?;

        for (task_id, result) in tasks {
            let mut task_start = BytesStart::new("task");
            task_start.push_attribute(("id", task_id.as_str()));
            write_event(&mut writer, Event::Start(task_start))?;
            let escaped = quick_xml::escape::escape(result.as_str());
            write_event(&mut writer, Event::Text(BytesText::from_escaped(escaped)))?;
            write_event(&mut writer, Event::End(BytesEnd::new("task")))?;
        }

        write_event(&mut writer, Event::End(BytesEnd::new("group")))?;
    }

    write_event(&mut writer, Event::End(BytesEnd::new("valuationResponse")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| EngineError::internal(format!("response xml not utf8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_group_single_task() {
        let xml = r#"<vnml><project><group name="G0"><t id="a"/></group></project></vnml>"#;
        let groups = parse_groups(xml).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name.as_deref(), Some("G0"));
        assert_eq!(groups[0].tasks.len(), 1);
        assert_eq!(groups[0].tasks[0].id, "a");
    }

    #[test]
    fn test_parse_two_groups_multiple_tasks() {
        let xml = r#"<vnml><project>
            <group name="G0"><t id="a"/><t id="b"/></group>
            <group name="G1"><t id="c"/></group>
        </project></vnml>"#;
        let groups = parse_groups(xml).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].tasks.len(), 2);
        assert_eq!(groups[1].tasks.len(), 1);
    }

    #[test]
    fn test_parse_task_with_children_preserves_fragment() {
        let xml = r#"<vnml><group><t id="a"><ref target="x"/></t></group></vnml>"#;
        let groups = parse_groups(xml).unwrap();
        let fragment = &groups[0].tasks[0].fragment_xml;
        assert!(fragment.contains("id=\"a\""));
        assert!(fragment.contains("<ref"));
    }

    #[test]
    fn test_missing_task_id_is_invalid_input() {
        let xml = r#"<vnml><group><t/></group></vnml>"#;
        let err = parse_groups(xml).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_no_groups_is_invalid_input() {
        let xml = r#"<vnml><project/></vnml>"#;
        let err = parse_groups(xml).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_malformed_xml_is_invalid_input() {
        let err = parse_groups("<vnml><group><t id=\"a\">").unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_build_response_assembles_group_task_order() {
        let id = Uuid::new_v4();
        let groups = vec![
            (0u32, vec![("a".to_string(), "1.0".to_string())]),
            (1u32, vec![("b".to_string(), "2.0".to_string())]),
        ];
        let xml = build_response(id, &groups).unwrap();
        assert!(xml.contains(&id.to_string()));
        let a_pos = xml.find("\"a\"").unwrap();
        let b_pos = xml.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }
}
