//! OpenAPI document generation and the docs UIs served next to it.

use std::collections::BTreeMap;

use utoipa::openapi::{
    Contact, Info, License, OpenApi, PathItem, Paths, RefOr, Required, Response, Responses,
    Server, Tag,
    path::{HttpMethod, Operation, Parameter, ParameterIn},
};

use crate::{Method, application::RouteDoc, config::ServerConfig};

const fn http_method(method: Method) -> Option<HttpMethod> {
    Some(match method {
        Method::Get => HttpMethod::Get,
        Method::Post => HttpMethod::Post,
        Method::Put => HttpMethod::Put,
        Method::Patch => HttpMethod::Patch,
        Method::Delete => HttpMethod::Delete,
        Method::Head => HttpMethod::Head,
        Method::Options => HttpMethod::Options,
        Method::Trace => HttpMethod::Trace,
        Method::Connect => return None,
    })
}

fn info(config: &ServerConfig) -> Info {
    let contact = config.contact.as_ref().map(|x| {
        Contact::builder()
            .name(x.name.clone())
            .url(x.url.clone())
            .email(x.email.clone())
            .build()
    });
    let license = config.effective_license().map(|x| {
        License::builder()
            .name(x.name)
            .url(x.url)
            .build()
    });

    Info::builder()
        .title(config.title.clone())
        .version(config.version.clone())
        .description(config.description.clone())
        .terms_of_service(config.terms_of_service.clone())
        .contact(contact)
        .license(license)
        .build()
}

fn path_params(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter_map(|x| x.strip_prefix('{').and_then(|x| x.strip_suffix('}')))
}

fn operation(route: &RouteDoc) -> Operation {
    let mut builder = Operation::builder()
        .summary(route.summary.clone())
        .description(route.description.clone())
        .operation_id(route.operation_id.clone())
        .responses(
            Responses::builder()
                .response(
                    "200",
                    RefOr::T(Response::builder().description("Successful response").build()),
                )
                .build(),
        );

    if !route.tags.is_empty() {
        builder = builder.tags(Some(route.tags.clone()));
    }

    for name in path_params(&route.path) {
        builder = builder.parameter(
            Parameter::builder()
                .name(name)
                .parameter_in(ParameterIn::Path)
                .required(Required::True)
                .schema(Some(utoipa::schema!(String))),
        );
    }

    builder.build()
}

/// Builds the document describing every route published in the schema.
#[must_use]
pub fn document(config: &ServerConfig, routes: &[RouteDoc]) -> OpenApi {
    let mut operations: BTreeMap<&str, Vec<(HttpMethod, Operation)>> = BTreeMap::new();

    for route in routes.iter().filter(|x| x.include_in_schema) {
        for method in &route.methods {
            let Some(http_method) = http_method(*method) else {
                log::debug!("document: {method} {} has no OpenAPI operation", route.path);
                continue;
            };
            operations
                .entry(route.path.as_str())
                .or_default()
                .push((http_method, operation(route)));
        }
    }

    let paths = operations
        .into_iter()
        .fold(Paths::builder(), |paths, (path, operations)| {
            let item = operations
                .into_iter()
                .fold(PathItem::builder(), |item, (method, operation)| {
                    item.operation(method, operation)
                })
                .build();
            paths.path(path, item)
        })
        .build();

    let tags = config
        .docs
        .openapi_tags
        .iter()
        .map(|x| {
            Tag::builder()
                .name(x.name.clone())
                .description(x.description.clone())
                .build()
        })
        .collect::<Vec<_>>();

    let servers = config
        .servers
        .iter()
        .map(|x| {
            Server::builder()
                .url(x.url.clone())
                .description(x.description.clone())
                .build()
        })
        .collect::<Vec<_>>();

    OpenApi::builder()
        .info(info(config))
        .paths(paths)
        .tags((!tags.is_empty()).then_some(tags))
        .servers((!servers.is_empty()).then_some(servers))
        .build()
}

#[must_use]
pub fn rapidoc_html(openapi_url: &str) -> String {
    utoipa_rapidoc::RapiDoc::new(openapi_url.to_string()).to_html()
}

#[must_use]
pub fn redoc_html(document: OpenApi) -> String {
    utoipa_redoc::Redoc::new(document).to_html()
}
