//! The fixed table of node kinds offered to workflow authors.

use flowcore::{
    DynamicOptionsSource, FieldDefinition, FieldType, LogicKind, NodeCategory, NodeDefinition,
    TriggerKind,
};
use flowruntime::logic::{Operator, FALSE_HANDLE, TRUE_HANDLE};

pub const MANUAL_TRIGGER: &str = "manual-trigger";
pub const SCHEDULE_TRIGGER: &str = "schedule-trigger";
pub const WEBHOOK_TRIGGER: &str = "webhook-trigger";

pub const SEND_EMAIL: &str = "send-email";
pub const CREATE_FORM: &str = "create-form";
pub const GENERATE_REPORT: &str = "generate-report";
pub const CREATE_EXAM: &str = "create-exam";
pub const ASSIGN_GRADE: &str = "assign-grade";
pub const UPDATE_STUDENT: &str = "update-student";
pub const CREATE_ATTENDANCE_SESSION: &str = "create-attendance-session";
pub const SEND_NOTIFICATION: &str = "send-notification";

pub const CONDITION: &str = "condition";
pub const DELAY: &str = "delay";

pub const GET_STUDENTS: &str = "get-students";
pub const GET_CLASSES: &str = "get-classes";
pub const GET_EXAM_RESULTS: &str = "get-exam-results";

pub const AI_GENERATE: &str = "ai-generate";
pub const AI_GRADE: &str = "ai-grade";
pub const AI_SUMMARIZE: &str = "ai-summarize";

/// Node types whose effects are provided by an adapter
pub const ADAPTER_TYPES: &[&str] = &[
    SEND_EMAIL,
    CREATE_FORM,
    GENERATE_REPORT,
    CREATE_EXAM,
    ASSIGN_GRADE,
    UPDATE_STUDENT,
    CREATE_ATTENDANCE_SESSION,
    SEND_NOTIFICATION,
    GET_STUDENTS,
    GET_CLASSES,
    GET_EXAM_RESULTS,
    AI_GENERATE,
    AI_GRADE,
    AI_SUMMARIZE,
];

fn text(name: &str, label: &str) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Text)
}

fn textarea(name: &str, label: &str) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Textarea)
}

fn number(name: &str, label: &str) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Number)
}

fn date(name: &str, label: &str) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Date)
}

fn select(name: &str, label: &str, options: &[(&str, &str)]) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Select).with_options(options)
}

fn dynamic(name: &str, label: &str, source: DynamicOptionsSource) -> FieldDefinition {
    FieldDefinition::new(name, label, FieldType::Select).with_dynamic_options(source)
}

/// Regular single-input, single-output step
fn step(node_type: &str, label: &str, category: NodeCategory, out_label: &str) -> NodeDefinition {
    NodeDefinition::new(node_type, label, category)
        .with_input("in", "In")
        .with_output("out", out_label)
}

fn trigger(node_type: &str, label: &str, kind: TriggerKind, out_label: &str) -> NodeDefinition {
    NodeDefinition::new(node_type, label, NodeCategory::Trigger(kind))
        .with_output("out", out_label)
        .with_variable("triggeredAt", "Triggered At", "When the workflow started")
}

pub fn definitions() -> Vec<NodeDefinition> {
    let mut defs = triggers();
    defs.extend(actions());
    defs.extend(logic());
    defs.extend(data());
    defs.extend(ai());
    defs
}

fn triggers() -> Vec<NodeDefinition> {
    vec![
        trigger(MANUAL_TRIGGER, "Manual Trigger", TriggerKind::Manual, "Start")
            .with_description("Starts the workflow manually.")
            .with_variable("triggeredBy", "Triggered By", "Who started the workflow"),
        trigger(SCHEDULE_TRIGGER, "Schedule", TriggerKind::Schedule, "Time")
            .with_description("Starts the workflow at a specific time.")
            .with_field(text("cron", "Cron Expression").with_placeholder("0 8 * * *"))
            .with_field(select(
                "timezone",
                "Timezone",
                &[("UTC", "UTC"), ("Vietnam (GMT+7)", "Asia/Ho_Chi_Minh")],
            ))
            .with_variable("scheduledAt", "Scheduled At", "The tick that fired"),
        trigger(WEBHOOK_TRIGGER, "Webhook", TriggerKind::Webhook, "Request")
            .with_description("Starts when an external request is received.")
            .with_field(select("method", "Method", &[("POST", "POST"), ("GET", "GET")]))
            .with_field(text("path", "Path").with_placeholder("/my-webhook"))
            .with_variable("payload", "Payload", "The request body"),
    ]
}

fn actions() -> Vec<NodeDefinition> {
    vec![
        step(SEND_EMAIL, "Send Email", NodeCategory::Action, "Sent")
            .with_description("Sends an email to a recipient.")
            .with_field(text("to", "To").required().with_placeholder("email@example.com"))
            .with_field(text("subject", "Subject").required().with_placeholder("Email Subject"))
            .with_field(textarea("body", "Body").with_placeholder("Email content..."))
            .with_variable("sentTo", "Recipient", "Address the email was sent to"),
        step(CREATE_FORM, "Create Form", NodeCategory::Action, "Created")
            .with_description("Creates a dynamic form.")
            .with_output("response", "On Response")
            .with_field(text("title", "Form Title").required().with_placeholder("Survey Title"))
            .with_field(textarea("description", "Description"))
            .with_field(date("deadline", "Deadline"))
            .with_field(text("assignTo", "Assign To").with_placeholder("Student ID or Email"))
            .with_variable("createdFormId", "Form ID", "The ID of the created form")
            .with_variable("formUrl", "Form URL", "The public URL of the form"),
        step(GENERATE_REPORT, "Generate Report", NodeCategory::Action, "Generated")
            .with_description("Generates a report.")
            .with_field(
                select(
                    "reportType",
                    "Report Type",
                    &[
                        ("Attendance", "attendance"),
                        ("Exam Results", "exam_results"),
                        ("Class Performance", "class_performance"),
                        ("Student Progress", "student_progress"),
                    ],
                )
                .required(),
            )
            .with_field(
                dynamic("classId", "Class", DynamicOptionsSource::Classes)
                    .with_placeholder("Optional (for class reports)"),
            )
            .with_field(
                dynamic("examId", "Exam", DynamicOptionsSource::Exams)
                    .with_placeholder("Optional (for exam reports)"),
            )
            .with_field(text("studentId", "Student ID").with_placeholder("Optional (for student reports)"))
            .with_field(date("startDate", "Start Date"))
            .with_field(date("endDate", "End Date"))
            .with_variable("reportId", "Report ID", "The ID of the generated report"),
        step(CREATE_EXAM, "Create Exam", NodeCategory::Action, "Created")
            .with_description("Creates a new exam.")
            .with_field(text("title", "Exam Title").required())
            .with_field(number("duration", "Duration (mins)").with_default(60.0))
            .with_field(text("questionBankId", "Question Bank ID"))
            .with_variable("createdExamId", "Exam ID", "The ID of the created exam")
            .with_variable("questionCount", "Question Count", "Number of questions in the exam"),
        step(ASSIGN_GRADE, "Assign Grade", NodeCategory::Action, "Assigned")
            .with_description("Assigns a grade to a student.")
            .with_field(text("studentId", "Student ID").required())
            .with_field(number("score", "Score").required())
            .with_field(textarea("comments", "Comments"))
            .with_variable("gradeId", "Grade ID", "The ID of the recorded grade")
            .with_variable("score", "Score", "The score that was recorded"),
        step(UPDATE_STUDENT, "Update Student", NodeCategory::Action, "Updated")
            .with_description("Updates student information.")
            .with_field(text("studentId", "Student ID").required())
            .with_field(
                select("field", "Field to Update", &[("Status", "status"), ("Class", "class")])
                    .required(),
            )
            .with_field(text("value", "New Value"))
            .with_variable("studentId", "Student ID", "The student that was updated")
            .with_variable("updatedField", "Updated Field", "Which field changed"),
        step(CREATE_ATTENDANCE_SESSION, "Create Attendance Code", NodeCategory::Action, "Created")
            .with_description("Generates a unique check-in code.")
            .with_field(dynamic("classId", "Class", DynamicOptionsSource::Classes).required())
            .with_field(number("timeout", "Timeout (minutes)").with_default(5.0))
            .with_variable("sessionCode", "Unique Code", "The 4-6 digit check-in code")
            .with_variable("expiryTime", "Expiry Time", "When the code expires")
            .with_variable("checkinUrl", "Check-in URL", "Direct link for students"),
        step(SEND_NOTIFICATION, "Web Notification", NodeCategory::Action, "Sent")
            .with_description("Sends a web notification.")
            .with_field(text("recipientId", "Recipient ID").required().with_placeholder("User ID"))
            .with_field(text("title", "Title").required())
            .with_field(textarea("message", "Message"))
            .with_field(
                select(
                    "type",
                    "Type",
                    &[("Info", "info"), ("Success", "success"), ("Warning", "warning")],
                )
                .with_default("info"),
            )
            .with_variable("notificationId", "Notification ID", "The ID of the sent notification"),
    ]
}

fn logic() -> Vec<NodeDefinition> {
    vec![
        NodeDefinition::new(CONDITION, "Condition (If/Else)", NodeCategory::Logic(LogicKind::Condition))
            .with_description("Checks a condition.")
            .with_input("in", "In")
            .with_output(TRUE_HANDLE, "True")
            .with_output(FALSE_HANDLE, "False")
            .with_field(text("variable", "Variable").required())
            .with_field(select("operator", "Operator", Operator::options()).with_default("eq"))
            .with_field(text("value", "Value"))
            .with_variable("result", "Result", "Whether the condition held"),
        step(DELAY, "Delay", NodeCategory::Logic(LogicKind::Delay), "After Delay")
            .with_description("Pauses execution for a duration.")
            .with_field(number("duration", "Duration (ms)").with_default(1000.0))
            .with_variable("waitedMs", "Waited (ms)", "How long execution paused"),
    ]
}

fn data() -> Vec<NodeDefinition> {
    vec![
        step(GET_STUDENTS, "Get Students", NodeCategory::Data, "Students")
            .with_description("Fetches a list of students.")
            .with_field(dynamic("classId", "Class", DynamicOptionsSource::Classes))
            .with_field(
                select(
                    "status",
                    "Status",
                    &[("Active", "active"), ("Inactive", "inactive"), ("All", "all")],
                )
                .with_default("all"),
            )
            .with_variable("students", "Students", "The matching students")
            .with_variable("studentCount", "Student Count", "Number of matching students"),
        step(GET_CLASSES, "Get Classes", NodeCategory::Data, "Classes")
            .with_description("Fetches a list of classes.")
            .with_field(text("semester", "Semester"))
            .with_variable("classes", "Classes", "The matching classes")
            .with_variable("classCount", "Class Count", "Number of matching classes"),
        step(GET_EXAM_RESULTS, "Get Exam Results", NodeCategory::Data, "Results")
            .with_description("Fetches results for an exam.")
            .with_field(dynamic("examId", "Exam", DynamicOptionsSource::Exams).required())
            .with_variable("examResults", "Results", "Every submission's result")
            .with_variable("resultCount", "Result Count", "Number of results")
            .with_variable("avgScore", "Average Score", "Mean score across results")
            .with_variable("maxScore", "Highest Score", "Best score")
            .with_variable("minScore", "Lowest Score", "Worst score"),
    ]
}

fn ai() -> Vec<NodeDefinition> {
    vec![
        step(AI_GENERATE, "AI Generate", NodeCategory::Ai, "Result")
            .with_description("Generates content using AI.")
            .with_field(textarea("prompt", "Prompt").required())
            .with_field(select(
                "model",
                "Model",
                &[("Gemini Pro", "gemini-pro"), ("GPT-4", "gpt-4")],
            ))
            .with_field(number("maxTokens", "Max Tokens").with_default(500.0))
            .with_field(number("temperature", "Temperature").with_default(0.7))
            .with_variable("aiGeneratedText", "Generated Text", "The content generated by AI")
            .with_variable("tokensUsed", "Tokens Used", "Tokens consumed by the request"),
        NodeDefinition::new(AI_GRADE, "AI Grade", NodeCategory::Ai)
            .with_description("AI grades a submission.")
            .with_input("in", "In")
            .with_output("score", "Score")
            .with_output("feedback", "Feedback")
            .with_field(textarea("submission", "Submission Text").required())
            .with_field(textarea("rubric", "Rubric").required())
            .with_field(number("maxScore", "Max Score").with_default(100.0))
            .with_variable("gradeScore", "Score", "The grade score")
            .with_variable("gradeFeedback", "Feedback", "Detailed feedback from AI")
            .with_variable("strengths", "Strengths", "What the submission did well")
            .with_variable("improvements", "Improvements", "What could be improved"),
        NodeDefinition::new(AI_SUMMARIZE, "AI Summarize", NodeCategory::Ai)
            .with_description("Summarizes text content.")
            .with_input("in", "In")
            .with_output("summary", "Summary")
            .with_field(textarea("text", "Text to Summarize").required())
            .with_field(
                select(
                    "length",
                    "Length",
                    &[("Short", "short"), ("Medium", "medium"), ("Long", "long")],
                )
                .with_default("short"),
            )
            .with_variable("summary", "Summary", "The summarized text"),
    ]
}
