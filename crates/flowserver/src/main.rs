use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use flowcore::{
    DefinitionError, EngineError, ExecutionId, FlowError, StoreError, TemplateId, Value, Workflow,
    WorkflowId,
};
use flowruntime::{
    FlowRuntime, NodeRegistry, RuntimeConfig, Scheduler, TemplateMeta, TemplateOverrides,
    TriggerRequest,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    runtime: FlowRuntime,
    scheduler: Scheduler,
}

/// Request body for a manual run
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    triggered_by: String,
    #[serde(default)]
    context: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: WorkflowId,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    execution_id: ExecutionId,
}

#[derive(Debug, Serialize)]
struct ValidationResponse {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFilter {
    execution_id: Option<ExecutionId>,
}

/// Maps engine failures onto HTTP statuses
fn error_response(e: FlowError) -> HttpResponse {
    let body = |details: Vec<String>| ErrorResponse {
        error: e.to_string(),
        details,
    };

    match &e {
        FlowError::Engine(EngineError::InvalidWorkflow { errors, .. }) => {
            let details = errors.iter().map(ToString::to_string).collect();
            HttpResponse::UnprocessableEntity().json(body(details))
        }
        FlowError::Engine(
            EngineError::WorkflowNotFound(_)
            | EngineError::ExecutionNotFound(_)
            | EngineError::TemplateNotFound(_)
            | EngineError::WebhookNotFound,
        )
        | FlowError::Store(StoreError::NotFound { .. })
        | FlowError::Definition(DefinitionError::UnknownType(_)) => {
            HttpResponse::NotFound().json(body(Vec::new()))
        }
        FlowError::Engine(
            EngineError::WorkflowInactive(_) | EngineError::WebhookTokenTaken(_),
        ) => {
            HttpResponse::Conflict().json(body(Vec::new()))
        }
        FlowError::Engine(
            EngineError::InvalidSchedule { .. } | EngineError::WeakWebhookToken { .. },
        ) => {
            HttpResponse::BadRequest().json(body(Vec::new()))
        }
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body(Vec::new()))
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowserver"
    }))
}

/// Catalog of node types, grouped by category
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.registry().definitions())
}

/// Current options of a select field. Dynamic sources that cannot be
/// reached degrade to free text.
#[get("/api/nodes/{node_type}/fields/{field}/options")]
async fn field_options(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ActixResult<HttpResponse> {
    let (node_type, field_name) = path.into_inner();
    let registry = data.runtime.registry();

    let field = match registry.lookup(&node_type) {
        Ok(def) => match def.field(&field_name) {
            Some(field) => field,
            None => {
                return Ok(HttpResponse::NotFound().json(ErrorResponse {
                    error: format!("Node type {} has no field {}", node_type, field_name),
                    details: Vec::new(),
                }))
            }
        },
        Err(e) => return Ok(error_response(e.into())),
    };

    match registry
        .resolve_dynamic_options(field, &Default::default())
        .await
    {
        Ok(options) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "options": options,
            "freeText": false,
        }))),
        Err(e) => {
            warn!("{}", e);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "options": [],
                "freeText": true,
            })))
        }
    }
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let workflows = match data.runtime.list_workflows().await {
        Ok(workflows) => workflows,
        Err(e) => return Ok(error_response(e)),
    };

    let workflow_list: Vec<_> = workflows
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "trigger": w.trigger,
                "isActive": w.is_active,
                "nodes": w.nodes.len(),
                "edges": w.edges.len(),
                "updatedAt": w.updated_at,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create or replace a workflow
#[post("/api/workflows")]
async fn save_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<HttpResponse> {
    let workflow = workflow.into_inner();
    let workflow_id = workflow.id;

    info!("Saving workflow: {} ({})", workflow.name, workflow_id);

    let warnings = match data.runtime.register_workflow(workflow.clone()).await {
        Ok(warnings) => warnings,
        Err(e) => return Ok(error_response(e)),
    };
    if let Err(e) = data.scheduler.schedule(&workflow).await {
        return Ok(error_response(e.into()));
    }

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        warnings: warnings.iter().map(ToString::to_string).collect(),
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<HttpResponse> {
    Ok(match data.runtime.get_workflow(path.into_inner()).await {
        Ok(workflow) => HttpResponse::Ok().json(workflow),
        Err(e) => error_response(e),
    })
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    if let Err(e) = data.runtime.delete_workflow(workflow_id).await {
        return Ok(error_response(e));
    }
    data.scheduler.unschedule(workflow_id).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Workflow deleted successfully"
    })))
}

#[post("/api/workflows/{id}/validate")]
async fn validate_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<HttpResponse> {
    let workflow = match data.runtime.get_workflow(path.into_inner()).await {
        Ok(workflow) => workflow,
        Err(e) => return Ok(error_response(e)),
    };

    let result = data.runtime.validate(&workflow);
    Ok(HttpResponse::Ok().json(ValidationResponse {
        valid: result.is_valid(),
        errors: result.errors.iter().map(ToString::to_string).collect(),
        warnings: result.warnings.iter().map(ToString::to_string).collect(),
    }))
}

/// Run a workflow manually and wait for the execution record
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    let req = req.into_inner();

    info!("Executing workflow {} for {}", workflow_id, req.triggered_by);

    let context = Value::map_from_json(req.context);
    match data
        .runtime
        .trigger_manual(workflow_id, req.triggered_by, context)
        .await
    {
        Ok(record) => {
            info!("Workflow {} finished as {}", workflow_id, record.status);
            Ok(HttpResponse::Ok().json(record))
        }
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/workflows/{id}/executions")]
async fn list_executions(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<HttpResponse> {
    Ok(match data.runtime.get_executions(path.into_inner()).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => error_response(e),
    })
}

#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> ActixResult<HttpResponse> {
    Ok(match data.runtime.get_execution(path.into_inner()).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e) => error_response(e),
    })
}

#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> ActixResult<HttpResponse> {
    let execution_id = path.into_inner();
    Ok(match data.runtime.cancel(execution_id).await {
        Ok(()) => HttpResponse::Accepted().json(AcceptedResponse { execution_id }),
        Err(e) => error_response(e),
    })
}

/// Inbound webhook. The run happens in the background; callers get the
/// execution id to poll.
#[post("/hooks/{token}")]
async fn receive_webhook(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let token = path.into_inner();

    let payload = if body.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                    error: format!("Webhook body is not valid JSON: {}", e),
                    details: Vec::new(),
                }))
            }
        }
    };

    let workflow_id = match data.runtime.resolve_webhook(&token).await {
        Ok(id) => id,
        Err(e) => return Ok(error_response(e)),
    };
    info!("Webhook received for workflow {}", workflow_id);

    Ok(
        match data
            .runtime
            .submit(TriggerRequest::webhook(workflow_id, payload))
            .await
        {
            Ok(execution_id) => HttpResponse::Accepted().json(AcceptedResponse { execution_id }),
            Err(e) => error_response(e),
        },
    )
}

#[get("/api/templates")]
async fn list_templates(data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    Ok(match data.runtime.templates().list().await {
        Ok(templates) => HttpResponse::Ok().json(templates),
        Err(e) => error_response(e),
    })
}

#[post("/api/workflows/{id}/save-as-template")]
async fn save_as_template(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
    meta: web::Json<TemplateMeta>,
) -> ActixResult<HttpResponse> {
    Ok(
        match data
            .runtime
            .save_as_template(path.into_inner(), meta.into_inner())
            .await
        {
            Ok(template) => HttpResponse::Created().json(template),
            Err(e) => error_response(e),
        },
    )
}

#[post("/api/templates/{id}/use")]
async fn use_template(
    data: web::Data<AppState>,
    path: web::Path<TemplateId>,
    overrides: web::Json<TemplateOverrides>,
) -> ActixResult<HttpResponse> {
    Ok(
        match data
            .runtime
            .use_template(path.into_inner(), overrides.into_inner())
            .await
        {
            Ok(workflow) => HttpResponse::Created().json(workflow),
            Err(e) => error_response(e),
        },
    )
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    filter: web::Query<EventFilter>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = filter.into_inner().execution_id;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if only.is_some_and(|id| id != event.execution_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flow Engine Server");

    let ai_service_url = std::env::var("AI_SERVICE_URL")
        .unwrap_or_else(|_| flownodes::DEFAULT_AI_SERVICE_URL.to_string());

    let mut registry = NodeRegistry::new();
    flownodes::register_all(&mut registry, &ai_service_url)?;
    info!(
        "✅ Registered {} node types (AI service at {})",
        registry.len(),
        ai_service_url
    );

    let runtime = FlowRuntime::new(registry.into(), RuntimeConfig::from_env());
    let scheduler = Scheduler::new(runtime.clone());
    scheduler.load_active().await?;

    let app_state = web::Data::new(AppState {
        runtime,
        scheduler: scheduler.clone(),
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_node_types)
            .service(field_options)
            .service(list_workflows)
            .service(save_workflow)
            .service(get_workflow)
            .service(delete_workflow)
            .service(validate_workflow)
            .service(execute_workflow)
            .service(list_executions)
            .service(get_execution)
            .service(cancel_execution)
            .service(receive_webhook)
            .service(list_templates)
            .service(save_as_template)
            .service(use_template)
            .service(websocket_events)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    scheduler.shutdown().await;
    Ok(())
}
