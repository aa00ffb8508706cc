//! XML export dialect.
//!
//! ```xml
//! <workflow name="Service Desk" initial-step="1">
//!   <meta name="jira.update.author.key">admin</meta>
//!   <steps>
//!     <step id="1" name="To Do" status="new">
//!       <actions>
//!         <action id="11" name="Start Progress" to="3">
//!           <conditions><condition type="actor_is_assignee"/></conditions>
//!           <post-functions><function type="reassign" to="actor"/></post-functions>
//!         </action>
//!       </actions>
//!     </step>
//!   </steps>
//! </workflow>
//! ```
//!
//! The document is read into a small element tree first, then interpreted.
//! An action's target is its `to` attribute or the `step` of a
//! `<results><unconditional-result>` child, and may name a step id or a
//! step name.

use std::collections::BTreeMap;
use std::collections::HashMap;

use flowdesk_types::workflow::{
    Condition, PostFunction, StatusCategory, Transition, WorkflowConfig,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{ConfigBuilder, Location, ParseError};

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
    line: usize,
    path: String,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn location(&self) -> Location {
        Location::Element {
            path: self.path.clone(),
            line: self.line,
        }
    }

    fn required_attr(&self, key: &str) -> Result<&str, ParseError> {
        self.attr(key).ok_or_else(|| ParseError::MissingAttribute {
            location: self.location(),
            attribute: key.to_string(),
        })
    }

    fn trimmed_text(&self) -> Option<&str> {
        Some(self.text.trim()).filter(|t| !t.is_empty())
    }
}

/// Decode every attribute of a start tag.
pub(crate) fn read_attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn line_at(raw: &str, offset: usize) -> usize {
    let end = offset.min(raw.len());
    raw.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

fn open_element(
    raw: &str,
    start: &BytesStart<'_>,
    offset: usize,
    parents: &[Element],
) -> Result<Element, ParseError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let path = match parents.last() {
        Some(parent) => format!("{}/{}", parent.path, name),
        None => name.clone(),
    };
    let line = line_at(raw, offset);
    let attrs = read_attributes(start).map_err(|message| ParseError::Xml {
        location: Location::Element {
            path: path.clone(),
            line,
        },
        message,
    })?;
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
        line,
        path,
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(ParseError::Xml {
            location: element.location(),
            message: "document has more than one root element".to_string(),
        });
    }
    *root = Some(element);
    Ok(())
}

fn read_tree(raw: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| ParseError::Xml {
            location: Location::Line(line_at(raw, reader.error_position() as usize)),
            message: e.to_string(),
        })?;
        // Just past the tag that was read, so the line is the tag's own.
        let offset = reader.buffer_position() as usize;

        match event {
            Event::Start(start) => {
                let element = open_element(raw, &start, offset, &stack)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(raw, &start, offset, &stack)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element)?;
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text.unescape().map_err(|e| ParseError::Xml {
                        location: top.location(),
                        message: e.to_string(),
                    })?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Xml {
            location: open.location(),
            message: format!("element <{}> is never closed", open.name),
        });
    }
    root.ok_or(ParseError::Empty)
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

pub(crate) fn parse_xml(raw: &str) -> Result<WorkflowConfig, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let root = read_tree(raw)?;
    if root.name != "workflow" {
        return Err(ParseError::Syntax {
            location: root.location(),
            message: format!("expected <workflow> root element, found <{}>", root.name),
        });
    }

    let name = root.required_attr("name")?;
    let mut builder = ConfigBuilder::new(name);

    let mut description = root
        .attr("description")
        .map(str::to_string)
        .or_else(|| root.child("description").and_then(|d| d.trimmed_text()).map(str::to_string));

    for meta in root.children_named("meta") {
        let key = meta.required_attr("name")?;
        let value = meta.text.trim();
        match key {
            "description" if description.is_none() => description = Some(value.to_string()),
            "tag" => builder.config_mut().tags.push(value.to_string()),
            _ => builder.config_mut().tags.push(format!("{key}={value}")),
        }
    }
    builder.config_mut().description = description.filter(|d| !d.is_empty());

    let steps: Vec<&Element> = root
        .child("steps")
        .map(|s| s.children_named("step").collect())
        .unwrap_or_default();

    // Pass 1: statuses. The first step with a given id wins the id mapping.
    let mut step_ids: HashMap<String, String> = HashMap::new();
    let mut initial_step: Option<&Element> = None;
    for step in &steps {
        let step_name = step.required_attr("name")?;
        let category = step
            .attr("status")
            .or_else(|| step.attr("category"))
            .map(StatusCategory::from_label)
            .unwrap_or(StatusCategory::Undefined);
        let status_id = builder.status(step_name, category);
        if let Some(step_id) = step.attr("id") {
            step_ids.entry(step_id.to_string()).or_insert(status_id);
        }
        if initial_step.is_none() && step.attr("initial").is_some_and(is_truthy) {
            initial_step = Some(step);
        }
    }

    let resolve = |builder: &ConfigBuilder, target: &str, at: &Element| {
        step_ids
            .get(target)
            .cloned()
            .or_else(|| builder.status_id(target).map(str::to_string))
            .ok_or_else(|| ParseError::UnknownStatus {
                location: at.location(),
                name: target.to_string(),
            })
    };

    // Explicit initial status: workflow attribute, then a flagged step,
    // then the target of the first initial action.
    let initial_ref = root
        .attr("initial-step")
        .or_else(|| initial_step.and_then(|s| s.attr("name")));
    let initial_id = match initial_ref {
        Some(target) => Some(resolve(&builder, target, &root)?),
        None => match root
            .child("initial-actions")
            .and_then(|ia| ia.child("action"))
        {
            Some(action) => Some(resolve(&builder, action_target(action)?, action)?),
            None => None,
        },
    };
    builder.config_mut().initial_status_id = initial_id;

    // Pass 2: transitions.
    for action in steps
        .iter()
        .filter_map(|step| step.child("actions"))
        .flat_map(|actions| actions.children_named("action"))
    {
        if let Some(id) = action.attr("id") {
            builder.reserve_transition_id(id);
        }
    }
    for step in &steps {
        let step_name = step.required_attr("name")?;
        let from = builder
            .status_id(step_name)
            .map(str::to_string)
            .ok_or_else(|| ParseError::UnknownStatus {
                location: step.location(),
                name: step_name.to_string(),
            })?;

        let Some(actions) = step.child("actions") else {
            continue;
        };
        for action in actions.children_named("action") {
            let to = resolve(&builder, action_target(action)?, action)?;
            let id = action
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| builder.next_transition_id());
            let name = action.attr("name").unwrap_or(id.as_str()).to_string();

            let mut conditions = Vec::new();
            if let Some(block) = action.child("conditions") {
                collect_conditions(block, &mut conditions)?;
            }
            let mut post_functions = Vec::new();
            if let Some(block) = action.child("post-functions") {
                for function in block
                    .children
                    .iter()
                    .filter(|c| c.name == "function" || c.name == "post-function")
                {
                    let (kind, parameters) = typed_entry(function)?;
                    post_functions.push(PostFunction { kind, parameters });
                }
            }

            builder.push_transition(Transition {
                id,
                name,
                from_status_id: from.clone(),
                to_status_id: to,
                conditions,
                post_functions,
            });
        }
    }

    Ok(builder.finish())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

fn action_target(action: &Element) -> Result<&str, ParseError> {
    if let Some(to) = action.attr("to") {
        return Ok(to);
    }
    action
        .child("results")
        .and_then(|r| {
            r.child("unconditional-result")
                .or_else(|| r.child("result"))
        })
        .and_then(|result| result.attr("step"))
        .ok_or_else(|| ParseError::MissingAttribute {
            location: action.location(),
            attribute: "to".to_string(),
        })
}

/// Flatten nested `<conditions>` groups into declaration order.
fn collect_conditions(block: &Element, out: &mut Vec<Condition>) -> Result<(), ParseError> {
    for child in &block.children {
        match child.name.as_str() {
            "condition" => {
                let (kind, parameters) = typed_entry(child)?;
                out.push(Condition { kind, parameters });
            }
            "conditions" => collect_conditions(child, out)?,
            _ => {}
        }
    }
    Ok(())
}

/// Read a `type` (attribute or text) plus parameters from extra attributes
/// and `<arg name="...">` children.
fn typed_entry(element: &Element) -> Result<(String, BTreeMap<String, String>), ParseError> {
    let kind = element
        .attr("type")
        .or_else(|| element.trimmed_text())
        .ok_or_else(|| ParseError::MissingAttribute {
            location: element.location(),
            attribute: "type".to_string(),
        })?
        .to_string();

    let mut parameters: BTreeMap<String, String> = element
        .attrs
        .iter()
        .filter(|(k, _)| k != "type")
        .map(|(k, v)| (k.clone(), v.trim().to_string()))
        .collect();
    for arg in element.children_named("arg") {
        let name = arg.required_attr("name")?;
        parameters.insert(name.to_string(), arg.text.trim().to_string());
    }
    Ok((kind, parameters))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_and_post_functions_keep_order_and_params() {
        let raw = r#"<workflow name="Change">
  <steps>
    <step id="1" name="Requested" status="To Do">
      <actions>
        <action id="5" name="Approve" to="2">
          <conditions type="AND">
            <condition type="actor_has_role" role="cab"/>
            <conditions>
              <condition>field_not_empty<arg name="field">riskScore</arg></condition>
            </conditions>
          </conditions>
          <post-functions>
            <function type="set_field" field="approvedBy" value="cab"/>
            <post-function type="notify_watchers"/>
          </post-functions>
        </action>
      </actions>
    </step>
    <step id="2" name="Approved" category="Done"/>
  </steps>
</workflow>"#;
        let config = parse_xml(raw).unwrap();
        assert_eq!(config.statuses[0].category, StatusCategory::New);
        assert_eq!(config.statuses[1].category, StatusCategory::Done);

        let approve = config.transition("5").unwrap();
        let kinds: Vec<&str> = approve.conditions.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, ["actor_has_role", "field_not_empty"]);
        assert_eq!(approve.conditions[0].param("role"), Some("cab"));
        assert_eq!(approve.conditions[1].param("field"), Some("riskScore"));
        assert_eq!(approve.post_functions.len(), 2);
        assert_eq!(approve.post_functions[0].param("field"), Some("approvedBy"));
        assert_eq!(approve.post_functions[1].kind, "notify_watchers");
    }

    #[test]
    fn test_steps_with_same_name_collapse_to_one_status() {
        let raw = r#"<workflow name="W">
  <steps>
    <step id="1" name="Open"><actions><action id="1" name="Go" to="2"/></actions></step>
    <step id="2" name="Closed"/>
    <step id="7" name="Open"><actions><action id="2" name="Go again" to="Closed"/></actions></step>
  </steps>
</workflow>"#;
        let config = parse_xml(raw).unwrap();
        assert_eq!(config.statuses.len(), 2);
        assert_eq!(config.transitions.len(), 2);
        assert!(config
            .transitions
            .iter()
            .all(|t| t.from_status_id == "status-1" && t.to_status_id == "status-2"));
    }

    #[test]
    fn test_unconditional_result_target_and_initial_actions() {
        let raw = r#"<workflow name="Jira">
  <initial-actions>
    <action id="1" name="Create"><results><unconditional-result step="2"/></results></action>
  </initial-actions>
  <steps>
    <step id="1" name="Backlog"/>
    <step id="2" name="Selected">
      <actions>
        <action id="4" name="Start"><results><unconditional-result old-status="x" step="3"/></results></action>
      </actions>
    </step>
    <step id="3" name="Doing"/>
  </steps>
</workflow>"#;
        let config = parse_xml(raw).unwrap();
        assert_eq!(config.initial_status().unwrap().name, "Selected");
        assert_eq!(config.transition("4").unwrap().to_status_id, "status-3");
    }

    #[test]
    fn test_initial_step_attribute_and_flag() {
        let by_attr = parse_xml(
            r#"<workflow name="W" initial-step="2"><steps><step id="1" name="A"/><step id="2" name="B"/></steps></workflow>"#,
        )
        .unwrap();
        assert_eq!(by_attr.initial_status().unwrap().name, "B");

        let by_flag = parse_xml(
            r#"<workflow name="W"><steps><step id="1" name="A"/><step id="2" name="B" initial="true"/></steps></workflow>"#,
        )
        .unwrap();
        assert_eq!(by_flag.initial_status().unwrap().name, "B");
    }

    #[test]
    fn test_meta_children_become_tags() {
        let config = parse_xml(
            r#"<workflow name="W">
  <meta name="jira.update.author.key">admin</meta>
  <meta name="description">Main flow</meta>
  <steps><step name="A"/></steps>
</workflow>"#,
        )
        .unwrap();
        assert_eq!(config.tags, vec!["jira.update.author.key=admin"]);
        assert_eq!(config.description.as_deref(), Some("Main flow"));
    }

    #[test]
    fn test_missing_workflow_name_reports_element() {
        let err = parse_xml("<workflow><steps/></workflow>").unwrap_err();
        match err {
            ParseError::MissingAttribute {
                location: Location::Element { path, line },
                attribute,
            } => {
                assert_eq!(path, "workflow");
                assert_eq!(line, 1);
                assert_eq!(attribute, "name");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_target_is_error() {
        let raw = "<workflow name=\"W\">\n<steps>\n<step id=\"1\" name=\"A\">\n<actions><action id=\"9\" name=\"Go\" to=\"42\"/></actions>\n</step>\n</steps>\n</workflow>";
        let err = parse_xml(raw).unwrap_err();
        match err {
            ParseError::UnknownStatus { location, name } => {
                assert_eq!(name, "42");
                assert_eq!(
                    location,
                    Location::Element {
                        path: "workflow/steps/step/actions/action".to_string(),
                        line: 4
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_generated_action_id_avoids_later_explicit_id() {
        let raw = r#"<workflow name="W"><steps>
<step id="1" name="A"><actions><action name="Go" to="2"/></actions></step>
<step id="2" name="B"><actions><action id="transition-1" name="Back" to="1"/></actions></step>
</steps></workflow>"#;
        let config = parse_xml(raw).unwrap();
        let ids: Vec<&str> = config.transitions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["transition-2", "transition-1"]);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let err = parse_xml("<workflow name=\"W\"><steps></workflow>").unwrap_err();
        assert!(matches!(err, ParseError::Xml { .. }));
    }

    #[test]
    fn test_wrong_root_element() {
        let err = parse_xml("<meta name=\"name\">W</meta>").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { ref message, .. } if message.contains("<meta>")));
    }

    #[test]
    fn test_condition_without_type_is_error() {
        let raw = r#"<workflow name="W"><steps><step id="1" name="A"><actions><action id="1" name="Loop" to="1"><conditions><condition/></conditions></action></actions></step></steps></workflow>"#;
        assert!(matches!(
            parse_xml(raw).unwrap_err(),
            ParseError::MissingAttribute { ref attribute, .. } if attribute == "type"
        ));
    }
}
