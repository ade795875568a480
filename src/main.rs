use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use vision_server::annotate::Annotator;
use vision_server::config::Config;
use vision_server::model::{ModelAdapter, TchBackend, labels};
use vision_server::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = Config::from_env().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, format!("configuration error: {}", e))
    })?;

    let labels = match &config.labels_path {
        Some(path) => labels::load_labels(path)?,
        None => labels::default_labels(),
    };
    log::info!("label table: {} classes", labels.len());

    // The model must load before the listener binds; a broken model file is
    // fatal at startup, not at first request.
    let backend = TchBackend::load(&config.model_path, config.model_kind).map_err(|e| {
        log::error!("failed to load model at startup: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, format!("model loading failed: {}", e))
    })?;
    log::info!(
        "loaded {:?} model from {}",
        config.model_kind,
        config.model_path.display()
    );

    let adapter = web::Data::new(ModelAdapter::new(Box::new(backend), labels));
    let annotator = web::Data::new(Annotator::new(config.font_path.as_deref()));

    let allowed_origin = config.allowed_origin.clone();
    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allowed_origin(&allowed_origin)
                    .allow_any_method()
                    .allow_any_header()
                    .supports_credentials()
                    .max_age(3600),
            )
            .app_data(adapter.clone())
            .app_data(annotator.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
