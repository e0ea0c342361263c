//! Sparse JSON rendering of retrieve tasks.

use std::io::Write;

use serde_json::{Map, Value};

use super::{Cell, ExportOptions, task_fields};
use crate::Result;
use crate::db::{QueueMessage, RetrieveTask};

/// Render one task as a JSON object
///
/// Absent fields and integer fields equal to 0 are left out (`pk` is always
/// written). Keys appear in export column order.
pub fn to_json(
    task: &RetrieveTask,
    message: Option<&QueueMessage>,
    options: &ExportOptions,
) -> Value {
    let mut object = Map::new();
    for (name, cell) in task_fields(task, message) {
        let value = match cell {
            None => continue,
            Some(Cell::Int(0)) if name != "pk" => continue,
            Some(Cell::Int(n)) => Value::from(n),
            Some(cell) => Value::String(cell.render(options)),
        };
        object.insert(name.to_string(), value);
    }
    Value::Object(object)
}

/// Write tasks as a JSON array, one object per task
pub fn write_json<'a, W, I>(writer: &mut W, records: I, options: &ExportOptions) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a RetrieveTask, Option<&'a QueueMessage>)>,
{
    writer.write_all(b"[")?;
    for (i, (task, message)) in records.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        serde_json::to_writer(&mut *writer, &to_json(task, message, options))?;
    }
    writer.write_all(b"]")?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures::{message, task};
    use crate::types::QueueStatus;

    #[test]
    fn new_task_omits_defaults() {
        let json = to_json(&task(), None, &ExportOptions::default());
        let object = json.as_object().unwrap();

        assert_eq!(object["pk"], 12);
        assert_eq!(object["remaining"], -1);
        assert_eq!(object["status"], "TO_SCHEDULE");
        assert_eq!(object["createdTime"], "2024-03-01T12:00:00.000+0000");
        for absent in [
            "completed",
            "failed",
            "warning",
            "statusCode",
            "errorComment",
            "seriesInstanceUID",
            "scheduledTime",
            "messageId",
            "failureCount",
        ] {
            assert!(!object.contains_key(absent), "{absent} should be omitted");
        }
    }

    #[test]
    fn in_process_progress() {
        let mut task = task();
        task.remaining = 5;
        task.completed = 2;
        let msg = message(QueueStatus::InProcess);

        let json = to_json(&task, Some(&msg), &ExportOptions::default());

        assert_eq!(json["completed"], 2);
        assert_eq!(json["remaining"], 5);
        assert_eq!(json["status"], "IN_PROCESS");
        assert_eq!(json["messageId"], "ID:00c0ffee");
        assert_eq!(json["processingStart"], "2024-03-01T12:00:01.250+0000");
        assert!(json.get("statusCode").is_none());
        assert!(json.get("errorComment").is_none());
        assert!(json.get("processingEnd").is_none());
    }

    #[test]
    fn failed_status_code_is_hex() {
        let mut task = task();
        task.status_code = 0xA701;
        task.error_comment = Some("Out of resources".into());
        let mut msg = message(QueueStatus::Failed);
        msg.num_failures = 2;

        let json = to_json(&task, Some(&msg), &ExportOptions::default());

        assert_eq!(json["statusCode"], "A701");
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["failureCount"], 2);
        assert_eq!(json["errorComment"], "Out of resources");
    }

    #[test]
    fn keys_keep_column_order() {
        let json = to_json(&task(), None, &ExportOptions::default());
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "pk",
                "createdTime",
                "updatedTime",
                "localAET",
                "remoteAET",
                "destinationAET",
                "studyInstanceUID",
                "remaining",
                "batchID",
                "deviceName",
                "queueName",
                "status",
            ]
        );
    }

    #[test]
    fn write_json_emits_array() {
        let first = task();
        let mut second = task();
        second.pk = crate::types::TaskId(13);
        let msg = message(QueueStatus::Scheduled);

        let mut out = Vec::new();
        write_json(
            &mut out,
            [(&first, None), (&second, Some(&msg))],
            &ExportOptions::default(),
        )
        .unwrap();

        let parsed: Value = serde_json::from_slice(&out).unwrap();
        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["status"], "TO_SCHEDULE");
        assert_eq!(items[1]["pk"], 13);
        assert_eq!(items[1]["status"], "SCHEDULED");
    }

    #[test]
    fn write_json_empty_is_empty_array() {
        let mut out = Vec::new();
        let none = std::iter::empty::<(&RetrieveTask, Option<&QueueMessage>)>();
        write_json(&mut out, none, &ExportOptions::default()).unwrap();
        assert_eq!(out, b"[]");
    }
}
