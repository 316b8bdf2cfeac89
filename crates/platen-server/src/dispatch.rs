// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request triage and operation dispatch.
//
// The triage checks run in a fixed order: protocol version, request-id,
// group ordering, the mandatory charset / natural-language / target-URI
// prologue, target resolution, and the shutdown gate. Anything that
// fails produces an IPP error response; only the HTTP-level
// authentication failures (401/403) leave as errors.

use std::sync::Arc;

use tracing::{debug, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, Operation, StatusCode, ValueTag};

use crate::ops::{self, Ctx};
use crate::store::System;
use crate::uri::{self, Target};

/// Dispatch one decoded request to its handler.
///
/// `username` is the HTTP-authenticated identity. The only `Err` returns
/// are `Unauthorized` and `Forbidden`, which the serving layer maps to
/// bare HTTP status codes.
pub async fn dispatch(
    system: &Arc<System>,
    username: Option<&str>,
    msg: Message,
) -> Result<Message> {
    // 1: protocol version.
    if !matches!(msg.version.0, 1 | 2) {
        return Ok(Message::error_response(
            &msg,
            StatusCode::ServerErrorVersionNotSupported,
            &format!("IPP/{}.{} is not supported", msg.version.0, msg.version.1),
        ));
    }

    // 2: request-id must be positive.
    if msg.request_id == 0 {
        return Ok(Message::error_response(
            &msg,
            StatusCode::ClientErrorBadRequest,
            "request-id must be greater than zero",
        ));
    }

    // 3: group tags arrive in non-decreasing order.
    let tags: Vec<u8> = msg.groups.iter().map(|g| g.tag as u8).collect();
    if tags.windows(2).any(|w| w[1] < w[0]) {
        return Ok(Message::error_response(
            &msg,
            StatusCode::ClientErrorBadRequest,
            "attribute groups out of order",
        ));
    }

    // 4: the operation-attributes prologue.
    let target_uri = match check_prologue(system, &msg) {
        Ok(uri) => uri,
        Err(resp) => return Ok(*resp),
    };

    // 5: the target URI must resolve.
    let Some(path) = uri::resource_path(&target_uri) else {
        return Ok(Message::error_response(
            &msg,
            StatusCode::ClientErrorNotFound,
            &format!("'{target_uri}' is not a valid target URI"),
        ));
    };
    let Some(target) = uri::resolve_target(system, &path) else {
        return Ok(Message::error_response(
            &msg,
            StatusCode::ClientErrorNotFound,
            &format!("no object at '{path}'"),
        ));
    };

    let operation = Operation::from_u16(msg.code);

    // 6: a shut-down printer only accepts Startup-Printer.
    if let Target::Printer(printer) | Target::Job(printer, _) = &target {
        let shutdown = printer.inner.read_lock().is_shutdown;
        if shutdown && operation != Some(Operation::StartupPrinter) {
            return Ok(Message::error_response(
                &msg,
                StatusCode::ServerErrorServiceUnavailable,
                "printer is shut down",
            ));
        }
    }

    let Some(operation) = operation else {
        warn!(code = format!("0x{:04x}", msg.code), "unsupported operation");
        return Ok(Message::error_response(
            &msg,
            StatusCode::ServerErrorOperationNotSupported,
            &format!("operation 0x{:04x} is not supported", msg.code),
        ));
    };

    debug!(operation = operation.name(), request_id = msg.request_id, "dispatch");

    let ctx = Ctx {
        system,
        username,
        req: &msg,
        target: &target,
    };
    let result = route(&ctx, operation).await;

    match result {
        Ok(resp) => Ok(resp),
        Err(PlatenError::Unauthorized) => Err(PlatenError::Unauthorized),
        Err(PlatenError::Forbidden) => Err(PlatenError::Forbidden),
        Err(err) => Ok(Message::error_response(
            &msg,
            status_for(&err),
            &err.to_string(),
        )),
    }
}

/// Checks 4 of the triage sequence; returns the target URI value.
fn check_prologue(system: &Arc<System>, msg: &Message) -> std::result::Result<String, Box<Message>> {
    let bad = |text: &str| Box::new(Message::error_response(msg, StatusCode::ClientErrorBadRequest, text));

    let Some(op) = msg.op_attrs() else {
        return Err(bad("missing operation attributes group"));
    };

    let charset = op.attrs.first().filter(|a| {
        a.name == "attributes-charset" && a.tag() == ValueTag::Charset
    });
    let Some(charset) = charset else {
        return Err(bad("attributes-charset must come first"));
    };
    match charset.as_str() {
        Some("utf-8") | Some("us-ascii") => {}
        Some(other) => {
            return Err(Box::new(Message::error_response(
                msg,
                StatusCode::ClientErrorCharsetNotSupported,
                &format!("charset '{other}' is not supported"),
            )));
        }
        None => return Err(bad("attributes-charset carries no value")),
    }

    let language_ok = op
        .attrs
        .get(1)
        .map(|a| a.name == "attributes-natural-language" && a.tag() == ValueTag::NaturalLanguage)
        .unwrap_or(false);
    if !language_ok {
        return Err(bad("attributes-natural-language must come second"));
    }

    const TARGET_NAMES: &[&str] = &["printer-uri", "job-uri", "system-uri"];
    let target = if system.config.relaxed_target_uri {
        op.attrs
            .iter()
            .find(|a| TARGET_NAMES.contains(&a.name.as_str()) && a.tag() == ValueTag::Uri)
    } else {
        op.attrs
            .get(2)
            .filter(|a| TARGET_NAMES.contains(&a.name.as_str()) && a.tag() == ValueTag::Uri)
    };
    match target.and_then(|a| a.as_str()) {
        Some(uri) => Ok(uri.to_string()),
        None => Err(bad("missing target URI (printer-uri, job-uri, or system-uri)")),
    }
}

/// Operation-code to handler routing.
async fn route(ctx: &Ctx<'_>, operation: Operation) -> Result<Message> {
    use Operation::*;
    use ops::system::{AllPrintersOp, OnePrinterOp};

    match operation {
        // Job creation and intake
        PrintJob => ops::job::print_job(ctx),
        PrintUri => ops::job::print_uri(ctx).await,
        ValidateJob => ops::job::validate_job(ctx),
        CreateJob => ops::job::create_job(ctx),
        SendDocument => ops::job::send_document(ctx),
        SendUri => ops::job::send_uri(ctx).await,

        // Job lifecycle
        CancelJob => ops::job::cancel_job(ctx),
        CancelCurrentJob => ops::job::cancel_current_job(ctx),
        CancelJobs => ops::job::cancel_jobs(ctx, false),
        CancelMyJobs => ops::job::cancel_jobs(ctx, true),
        GetJobAttributes => ops::job::get_job_attributes(ctx),
        SetJobAttributes => ops::job::set_job_attributes(ctx),
        GetJobs => ops::job::get_jobs(ctx),
        CloseJob => ops::job::close_job(ctx),
        HoldJob => ops::job::hold_job(ctx),
        ReleaseJob => ops::job::release_job(ctx),
        HoldNewJobs => ops::job::hold_new_jobs(ctx),
        ReleaseHeldNewJobs => ops::job::release_held_new_jobs(ctx),

        // Documents
        CancelDocument => ops::job::cancel_document(ctx),
        GetDocumentAttributes => ops::job::get_document_attributes(ctx),
        GetDocuments => ops::job::get_documents(ctx),
        SetDocumentAttributes => ops::job::set_document_attributes(ctx),
        ValidateDocument => ops::job::validate_document(ctx),

        // Printer queries and state
        GetPrinterAttributes | GetUserPrinterAttributes => {
            ops::printer::get_printer_attributes(ctx)
        }
        GetPrinterSupportedValues => ops::printer::get_printer_supported_values(ctx),
        SetPrinterAttributes => ops::printer::set_printer_attributes(ctx),
        IdentifyPrinter => ops::printer::identify_printer(ctx),
        PausePrinter => ops::printer::state_op(ctx, |s, p| ops::printer::do_pause(s, p, false)),
        PausePrinterAfterCurrentJob => {
            ops::printer::state_op(ctx, |s, p| ops::printer::do_pause(s, p, true))
        }
        ResumePrinter => ops::printer::state_op(ctx, ops::printer::do_resume),
        EnablePrinter => ops::printer::state_op(ctx, ops::printer::do_enable),
        DisablePrinter => ops::printer::state_op(ctx, ops::printer::do_disable),
        ShutdownPrinter => ops::printer::state_op(ctx, ops::printer::do_shutdown),
        StartupPrinter => ops::printer::state_op(ctx, ops::printer::do_startup),
        RestartPrinter => ops::printer::state_op(ctx, ops::printer::do_restart),

        // Printer lifecycle (system)
        CreatePrinter => ops::printer::create_printer(ctx),
        DeletePrinter => ops::printer::delete_printer(ctx),
        GetPrinters => ops::printer::get_printers(ctx),
        ShutdownOnePrinter => ops::system::one_printer_op(ctx, OnePrinterOp::Shutdown),
        StartupOnePrinter => ops::system::one_printer_op(ctx, OnePrinterOp::Startup),
        RestartOnePrinter => ops::system::one_printer_op(ctx, OnePrinterOp::Restart),

        // Resources
        AllocatePrinterResources => ops::printer::allocate_printer_resources(ctx),
        DeallocatePrinterResources => ops::printer::deallocate_printer_resources(ctx),
        GetPrinterResources => ops::printer::get_printer_resources(ctx),
        CancelResource => ops::resource::cancel_resource(ctx),
        CreateResource => ops::resource::create_resource(ctx),
        InstallResource => ops::resource::install_resource(ctx),
        SendResourceData => ops::resource::send_resource_data(ctx),
        SetResourceAttributes => ops::resource::set_resource_attributes(ctx),
        GetResourceAttributes => ops::resource::get_resource_attributes(ctx),
        GetResources => ops::resource::get_resources(ctx),

        // Subscriptions and notifications
        CreatePrinterSubscriptions => {
            ops::subscription::create_subscriptions(ctx, ops::subscription::SubscriptionScope::Printer)
        }
        CreateJobSubscriptions => {
            ops::subscription::create_subscriptions(ctx, ops::subscription::SubscriptionScope::Job)
        }
        CreateResourceSubscriptions => {
            ops::subscription::create_subscriptions(ctx, ops::subscription::SubscriptionScope::Resource)
        }
        CreateSystemSubscriptions => {
            ops::subscription::create_subscriptions(ctx, ops::subscription::SubscriptionScope::System)
        }
        GetSubscriptionAttributes => ops::subscription::get_subscription_attributes(ctx),
        GetSubscriptions => ops::subscription::get_subscriptions(ctx),
        RenewSubscription => ops::subscription::renew_subscription(ctx),
        CancelSubscription => ops::subscription::cancel_subscription(ctx),
        GetNotifications => ops::subscription::get_notifications(ctx).await,

        // Output devices (proxy)
        RegisterOutputDevice => ops::proxy::register_output_device(ctx),
        DeregisterOutputDevice => ops::proxy::deregister_output_device(ctx),
        GetOutputDeviceAttributes => ops::proxy::get_output_device_attributes(ctx),
        UpdateOutputDeviceAttributes => ops::proxy::update_output_device_attributes(ctx),
        UpdateActiveJobs => ops::proxy::update_active_jobs(ctx),
        UpdateJobStatus => ops::proxy::update_job_status(ctx),
        UpdateDocumentStatus => ops::proxy::update_document_status(ctx),
        AcknowledgeJob => ops::proxy::acknowledge_job(ctx),
        AcknowledgeDocument => ops::proxy::acknowledge_document(ctx),
        AcknowledgeIdentifyPrinter => ops::proxy::acknowledge_identify_printer(ctx),
        FetchJob => ops::proxy::fetch_job(ctx),
        FetchDocument => ops::proxy::fetch_document(ctx).await,

        // System service
        GetSystemAttributes => ops::system::get_system_attributes(ctx),
        GetSystemSupportedValues => ops::system::get_system_supported_values(ctx),
        SetSystemAttributes => ops::system::set_system_attributes(ctx),
        RestartSystem => ops::system::restart_system(ctx),
        DisableAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Disable),
        EnableAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Enable),
        PauseAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Pause),
        PauseAllPrintersAfterCurrentJob => {
            ops::system::all_printers_op(ctx, AllPrintersOp::PauseAfterCurrentJob)
        }
        ResumeAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Resume),
        ShutdownAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Shutdown),
        StartupAllPrinters => ops::system::all_printers_op(ctx, AllPrintersOp::Startup),
    }
}

/// IPP status for each error category.
fn status_for(err: &PlatenError) -> StatusCode {
    match err {
        PlatenError::BadRequest(_) => StatusCode::ClientErrorBadRequest,
        PlatenError::VersionNotSupported(_) => StatusCode::ServerErrorVersionNotSupported,
        PlatenError::NotFound(_) => StatusCode::ClientErrorNotFound,
        PlatenError::Unsupported(_) => StatusCode::ClientErrorAttributesOrValuesNotSupported,
        PlatenError::OperationNotSupported(_) => StatusCode::ServerErrorOperationNotSupported,
        PlatenError::NotPossible(_) => StatusCode::ClientErrorNotPossible,
        PlatenError::NotSettable(_) => StatusCode::ClientErrorAttributesNotSettable,
        PlatenError::TooManyJobs => StatusCode::ServerErrorTooManyJobs,
        PlatenError::NotAcceptingJobs => StatusCode::ServerErrorNotAcceptingJobs,
        PlatenError::DocumentAccess(_) => StatusCode::ClientErrorDocumentAccessError,
        PlatenError::Unavailable(_) => StatusCode::ServerErrorServiceUnavailable,
        PlatenError::Unauthorized | PlatenError::Forbidden => StatusCode::ClientErrorNotAuthorized,
        PlatenError::Transform(_)
        | PlatenError::InvariantViolated(_)
        | PlatenError::Internal(_)
        | PlatenError::Io(_)
        | PlatenError::Serialization(_) => StatusCode::ServerErrorInternalError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::config::ServerConfig;
    use platen_core::types::{EVENT_JOB_STATE_CHANGED, JobState};
    use platen_ipp::attr::Attribute;
    use platen_ipp::value::Value;

    use crate::printer::Printer;

    fn fixture() -> (Arc<System>, Arc<Printer>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServerConfig::default();
        config.hostname = "h".into();
        config.spool_dir = dir.path().to_path_buf();
        let system = System::new(config);
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(Arc::clone(&printer));
        (system, printer, dir)
    }

    /// A well-formed request with the mandatory prologue.
    fn request(op: Operation, request_id: u32, target: &str) -> Message {
        let mut msg = Message::request(op, request_id);
        let g = msg.new_group(DelimiterTag::OperationAttributes);
        g.add(Attribute::charset("attributes-charset", "utf-8"));
        g.add(Attribute::language("attributes-natural-language", "en"));
        let name = if target == "ipp://h/ipp/system" {
            "system-uri"
        } else {
            "printer-uri"
        };
        g.add(Attribute::uri(name, target));
        msg
    }

    async fn run(system: &Arc<System>, msg: Message) -> Message {
        dispatch(system, None, msg).await.expect("ipp response")
    }

    // -- Triage -------------------------------------------------------------

    #[tokio::test]
    async fn bad_version_is_rejected() {
        let (system, _p, _dir) = fixture();
        let mut msg = request(Operation::GetPrinterAttributes, 1, "ipp://h/ipp/print/p");
        msg.version = (3, 0);
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ServerErrorVersionNotSupported.code());
    }

    #[tokio::test]
    async fn zero_request_id_is_bad_request() {
        let (system, _p, _dir) = fixture();
        let msg = request(Operation::GetPrinterAttributes, 0, "ipp://h/ipp/print/p");
        let resp = dispatch(&system, None, msg).await.unwrap();
        assert_eq!(resp.code, StatusCode::ClientErrorBadRequest.code());
    }

    #[tokio::test]
    async fn group_order_is_enforced() {
        let (system, _p, _dir) = fixture();
        let mut msg = request(Operation::PrintJob, 1, "ipp://h/ipp/print/p");
        // A job group before the (already present) operation group.
        msg.groups.insert(
            0,
            platen_ipp::attr::AttributeGroup::new(DelimiterTag::JobAttributes),
        );
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ClientErrorBadRequest.code());
    }

    #[tokio::test]
    async fn missing_charset_is_bad_request() {
        let (system, _p, _dir) = fixture();
        let mut msg = Message::request(Operation::GetPrinterAttributes, 1);
        let g = msg.new_group(DelimiterTag::OperationAttributes);
        g.add(Attribute::language("attributes-natural-language", "en"));
        g.add(Attribute::uri("printer-uri", "ipp://h/ipp/print/p"));
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ClientErrorBadRequest.code());
    }

    #[tokio::test]
    async fn unsupported_charset_value() {
        let (system, _p, _dir) = fixture();
        let mut msg = Message::request(Operation::GetPrinterAttributes, 1);
        let g = msg.new_group(DelimiterTag::OperationAttributes);
        g.add(Attribute::charset("attributes-charset", "iso-8859-1"));
        g.add(Attribute::language("attributes-natural-language", "en"));
        g.add(Attribute::uri("printer-uri", "ipp://h/ipp/print/p"));
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ClientErrorCharsetNotSupported.code());
    }

    #[tokio::test]
    async fn unknown_printer_is_not_found() {
        let (system, _p, _dir) = fixture();
        let msg = request(Operation::GetPrinterAttributes, 1, "ipp://h/ipp/print/ghost");
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ClientErrorNotFound.code());
    }

    #[tokio::test]
    async fn unknown_operation_code_has_no_side_effects() {
        let (system, printer, _dir) = fixture();
        let mut msg = request(Operation::GetPrinterAttributes, 1, "ipp://h/ipp/print/p");
        msg.code = 0x7777;
        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::ServerErrorOperationNotSupported.code());
        assert!(printer.all_jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_printer_only_accepts_startup() {
        let (system, printer, _dir) = fixture();
        printer.inner.write().unwrap().is_shutdown = true;

        let resp = run(
            &system,
            request(Operation::GetPrinterAttributes, 1, "ipp://h/ipp/print/p"),
        )
        .await;
        assert_eq!(resp.code, StatusCode::ServerErrorServiceUnavailable.code());

        let resp = dispatch(
            &system,
            Some("root"),
            request(Operation::StartupPrinter, 2, "ipp://h/ipp/print/p"),
        )
        .await
        .unwrap();
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());
        assert!(!printer.inner.read().unwrap().is_shutdown);
    }

    // -- S1: Print-Job happy path ------------------------------------------

    #[tokio::test]
    async fn print_job_happy_path() {
        let (system, printer, _dir) = fixture();
        let mut msg = request(Operation::PrintJob, 1, "ipp://h/ipp/print/p");
        msg.add(
            DelimiterTag::OperationAttributes,
            Attribute::mime_type("document-format", "application/pdf"),
        );
        msg.payload = b"%PDF-1.7 minimal".to_vec();

        let resp = run(&system, msg).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());

        let job_group = resp
            .group(DelimiterTag::JobAttributes)
            .expect("job attributes group");
        assert_eq!(job_group.find("job-id").unwrap().as_i32(), Some(1));
        let state = job_group.find("job-state").unwrap().as_i32().unwrap();
        assert!(state == JobState::Pending.ipp_enum() || state == JobState::Processing.ipp_enum());
        assert_eq!(
            job_group.find("job-uri").unwrap().as_str(),
            Some("ipp://h:631/ipp/print/p/1")
        );

        let job = printer.job_by_id(1).expect("job registered");
        assert_eq!(job.inner.read().unwrap().format, "application/pdf");
        assert!(job.inner.read().unwrap().filename.is_some());
    }

    // -- S2: Create-Job + Send-Document with format detection --------------

    #[tokio::test]
    async fn create_job_then_send_document_detects_postscript() {
        let (system, printer, _dir) = fixture();

        let resp = run(&system, request(Operation::CreateJob, 1, "ipp://h/ipp/print/p")).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());
        let job_id = resp
            .group(DelimiterTag::JobAttributes)
            .and_then(|g| g.find("job-id"))
            .and_then(|a| a.as_i32())
            .expect("job-id");

        let mut send = request(Operation::SendDocument, 2, "ipp://h/ipp/print/p");
        send.add(
            DelimiterTag::OperationAttributes,
            Attribute::integer("job-id", job_id),
        );
        send.add(
            DelimiterTag::OperationAttributes,
            Attribute::boolean("last-document", true),
        );
        send.payload = b"%!PS-Adobe-3.0\n...".to_vec();
        let resp = run(&system, send).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());

        let job = printer.job_by_id(job_id).unwrap();
        let inner = job.inner.read().unwrap();
        assert_eq!(inner.format, "application/postscript");
        assert!(!inner.spooling);
        assert_eq!(inner.state, JobState::Pending);
        assert_eq!(
            inner.doc_attrs.find("document-format-detected").unwrap().as_str(),
            Some("application/postscript")
        );
    }

    // -- S3: Cancel while held ----------------------------------------------

    #[tokio::test]
    async fn cancel_held_job_completes_it_and_notifies() {
        let (system, printer, _dir) = fixture();

        // A subscription listening for job-completed on the printer.
        let mut create_sub =
            request(Operation::CreatePrinterSubscriptions, 1, "ipp://h/ipp/print/p");
        let g = create_sub.new_group(DelimiterTag::SubscriptionAttributes);
        g.add(Attribute::keyword("notify-pull-method", "ippget"));
        g.add(Attribute::keywords("notify-events", &["job-completed"]));
        g.add(Attribute::integer("notify-lease-duration", 60));
        let resp = run(&system, create_sub).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());
        let sub_id = resp
            .group(DelimiterTag::SubscriptionAttributes)
            .and_then(|g| g.find("notify-subscription-id"))
            .and_then(|a| a.as_i32())
            .expect("subscription id");

        // Held job.
        let mut create = request(Operation::CreateJob, 2, "ipp://h/ipp/print/p");
        let jg = create.new_group(DelimiterTag::JobAttributes);
        jg.add(Attribute::keyword("job-hold-until", "indefinite"));
        let resp = run(&system, create).await;
        let job_id = resp
            .group(DelimiterTag::JobAttributes)
            .and_then(|g| g.find("job-id"))
            .and_then(|a| a.as_i32())
            .unwrap();
        let job = printer.job_by_id(job_id).unwrap();
        assert_eq!(job.state(), JobState::Held);

        // Cancel it.
        let mut cancel = request(Operation::CancelJob, 3, "ipp://h/ipp/print/p");
        cancel.add(
            DelimiterTag::OperationAttributes,
            Attribute::integer("job-id", job_id),
        );
        let resp = run(&system, cancel).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());
        assert_eq!(job.state(), JobState::Canceled);
        assert!(job.inner.read().unwrap().completed_at.is_some());

        // The completion event landed in the subscription.
        let sub = system.subscription_by_id(sub_id).unwrap();
        let events = sub.events_since(1);
        assert!(events.iter().any(|e| {
            e.group.find("notify-subscribed-event").and_then(|a| a.as_str())
                == Some("job-completed")
        }));
    }

    // -- S4: subscription pull with wait ------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_notifications_wait_unblocks_on_event() {
        let (system, printer, _dir) = fixture();

        let mut create_sub =
            request(Operation::CreatePrinterSubscriptions, 1, "ipp://h/ipp/print/p");
        let g = create_sub.new_group(DelimiterTag::SubscriptionAttributes);
        g.add(Attribute::keyword("notify-pull-method", "ippget"));
        g.add(Attribute::keywords("notify-events", &["job-state-changed"]));
        g.add(Attribute::integer("notify-lease-duration", 60));
        run(&system, create_sub).await;

        let mut pull = request(Operation::GetNotifications, 2, "ipp://h/ipp/print/p");
        pull.add(
            DelimiterTag::OperationAttributes,
            Attribute::integer("notify-subscription-ids", 1),
        );
        pull.add(
            DelimiterTag::OperationAttributes,
            Attribute::integer("notify-sequence-numbers", 1),
        );
        pull.add(
            DelimiterTag::OperationAttributes,
            Attribute::boolean("notify-wait", true),
        );

        let waiter = tokio::spawn({
            let system = Arc::clone(&system);
            async move { dispatch(&system, None, pull).await.unwrap() }
        });

        // Give the waiter a moment to block, then trigger an event.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let job = crate::job::Job::create(system.next_job_id(), printer.id, "alice", "doc", 50);
        printer.enqueue_job(Arc::clone(&job));
        crate::events::add_event(
            &system,
            Some(&printer),
            Some(&job),
            EVENT_JOB_STATE_CHANGED,
            "state change",
        );

        let resp = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("wait bounded")
            .expect("join");
        let event = resp
            .group(DelimiterTag::EventNotificationAttributes)
            .expect("event group");
        assert_eq!(
            event.find("notify-subscribed-event").unwrap().as_str(),
            Some("job-state-changed")
        );
        assert_eq!(event.find("notify-sequence-number").unwrap().as_i32(), Some(1));
    }

    // -- S6: unsupported attribute value ------------------------------------

    #[tokio::test]
    async fn zero_copies_rejected_with_unsupported_group() {
        let (system, printer, _dir) = fixture();
        let mut msg = request(Operation::PrintJob, 1, "ipp://h/ipp/print/p");
        let jg = msg.new_group(DelimiterTag::JobAttributes);
        jg.add(Attribute::integer("copies", 0));
        msg.payload = b"%PDF-1.7".to_vec();

        let resp = run(&system, msg).await;
        assert_eq!(
            resp.code,
            StatusCode::ClientErrorAttributesOrValuesNotSupported.code()
        );
        let unsupported = resp
            .group(DelimiterTag::UnsupportedAttributes)
            .expect("unsupported group");
        let copies = unsupported.find("copies").expect("copies echoed");
        assert_eq!(copies.value(), Some(&Value::Integer(0)));
        assert!(printer.all_jobs().is_empty());
    }

    // -- Authorization surfaces ---------------------------------------------

    #[tokio::test]
    async fn admin_op_without_identity_is_unauthorized() {
        let (system, _p, _dir) = fixture();
        let msg = request(Operation::PausePrinter, 1, "ipp://h/ipp/print/p");
        let result = dispatch(&system, None, msg).await;
        assert!(matches!(result, Err(PlatenError::Unauthorized)));
    }

    #[tokio::test]
    async fn wrong_group_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.hostname = "h".into();
        config.spool_dir = dir.path().to_path_buf();
        config.admin_group = Some("admin".into());
        config.users.insert("eve".into(), vec!["print".into()]);
        let system = System::new(config);
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(printer);

        let msg = request(Operation::PausePrinter, 1, "ipp://h/ipp/print/p");
        let result = dispatch(&system, Some("eve"), msg).await;
        assert!(matches!(result, Err(PlatenError::Forbidden)));
    }

    // -- Job-URI targeting ---------------------------------------------------

    #[tokio::test]
    async fn job_uri_resolves_to_job_target() {
        let (system, _printer, _dir) = fixture();
        let mut msg = request(Operation::PrintJob, 1, "ipp://h/ipp/print/p");
        msg.payload = b"%PDF-1.7".to_vec();
        run(&system, msg).await;

        let mut get = Message::request(Operation::GetJobAttributes, 2);
        let g = get.new_group(DelimiterTag::OperationAttributes);
        g.add(Attribute::charset("attributes-charset", "utf-8"));
        g.add(Attribute::language("attributes-natural-language", "en"));
        g.add(Attribute::uri("job-uri", "ipp://h/ipp/print/p/1"));
        let resp = run(&system, get).await;
        assert_eq!(resp.code, StatusCode::SuccessfulOk.code());
        assert_eq!(
            resp.group(DelimiterTag::JobAttributes)
                .and_then(|g| g.find("job-id"))
                .and_then(|a| a.as_i32()),
            Some(1)
        );
    }

    // -- Concurrency smoke test ----------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_requests_do_not_deadlock() {
        let (system, _printer, _dir) = fixture();
        let mut tasks = Vec::new();
        for i in 0..50u32 {
            let system = Arc::clone(&system);
            tasks.push(tokio::spawn(async move {
                match i % 4 {
                    0 => {
                        let mut msg =
                            request(Operation::PrintJob, i + 1, "ipp://h/ipp/print/p");
                        msg.payload = b"%PDF-1.7".to_vec();
                        dispatch(&system, None, msg).await.unwrap();
                    }
                    1 => {
                        let mut msg =
                            request(Operation::CancelJob, i + 1, "ipp://h/ipp/print/p");
                        msg.add(
                            DelimiterTag::OperationAttributes,
                            Attribute::integer("job-id", (i / 4) as i32 + 1),
                        );
                        // Racing cancels may hit missing or finished jobs.
                        let _ = dispatch(&system, None, msg).await;
                    }
                    2 => {
                        let msg = request(
                            Operation::GetPrinterAttributes,
                            i + 1,
                            "ipp://h/ipp/print/p",
                        );
                        dispatch(&system, None, msg).await.unwrap();
                    }
                    _ => {
                        let msg = request(Operation::GetJobs, i + 1, "ipp://h/ipp/print/p");
                        dispatch(&system, None, msg).await.unwrap();
                    }
                }
            }));
        }
        for task in tasks {
            tokio::time::timeout(std::time::Duration::from_secs(10), task)
                .await
                .expect("no deadlock")
                .expect("no panic");
        }
    }

    // -- Get-Jobs filtering ---------------------------------------------------

    #[tokio::test]
    async fn get_jobs_filters_by_which_jobs() {
        let (system, printer, _dir) = fixture();
        for i in 1..=2 {
            let mut msg = request(Operation::PrintJob, i, "ipp://h/ipp/print/p");
            msg.payload = b"%PDF-1.7".to_vec();
            run(&system, msg).await;
        }
        // Cancel the first.
        let job = printer.job_by_id(1).unwrap();
        crate::engine::cancel_job(&system, &printer, &job).unwrap();

        let mut not_completed = request(Operation::GetJobs, 10, "ipp://h/ipp/print/p");
        not_completed.add(
            DelimiterTag::OperationAttributes,
            Attribute::keyword("which-jobs", "not-completed"),
        );
        let resp = run(&system, not_completed).await;
        let ids: Vec<i32> = resp
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|g| g.find("job-id").and_then(|a| a.as_i32()))
            .collect();
        assert_eq!(ids, vec![2]);

        let mut completed = request(Operation::GetJobs, 11, "ipp://h/ipp/print/p");
        completed.add(
            DelimiterTag::OperationAttributes,
            Attribute::keyword("which-jobs", "completed"),
        );
        let resp = run(&system, completed).await;
        let ids: Vec<i32> = resp
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|g| g.find("job-id").and_then(|a| a.as_i32()))
            .collect();
        assert_eq!(ids, vec![1]);
    }
}
