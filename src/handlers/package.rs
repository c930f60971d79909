use actix_web::{HttpResponse, ResponseError, Result, web};

use crate::models::*;
use crate::services::PackageService;

#[utoipa::path(
    get,
    path = "/api/packages",
    tag = "packages",
    responses(
        (status = 200, description = "Active packages, most expensive first", body = [PackageResponse])
    )
)]
pub async fn list_packages(package_service: web::Data<PackageService>) -> Result<HttpResponse> {
    match package_service.list_packages().await {
        Ok(list) => {
            let data: Vec<PackageResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/packages/{id}",
    tag = "packages",
    params(("id" = i32, Path, description = "Package id")),
    responses(
        (status = 200, description = "Package details", body = PackageResponse),
        (status = 404, description = "Package not found")
    )
)]
pub async fn get_package(
    package_service: web::Data<PackageService>,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    match package_service.get_package(path.into_inner()).await {
        Ok(package) => Ok(HttpResponse::Ok().json(ApiResponse::success(PackageResponse::from(package)))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/packages/{id}/yearly-price",
    tag = "packages",
    params(("id" = i32, Path, description = "Package id")),
    responses(
        (status = 200, description = "Yearly price after discount", body = YearlyPriceResponse),
        (status = 404, description = "Package not found")
    )
)]
pub async fn get_yearly_price(
    package_service: web::Data<PackageService>,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    match package_service.yearly_price(path.into_inner()).await {
        Ok(price) => Ok(HttpResponse::Ok().json(ApiResponse::success(price))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn package_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/packages")
            .route("", web::get().to(list_packages))
            .route("/{id}", web::get().to(get_package))
            .route("/{id}/yearly-price", web::get().to(get_yearly_price)),
    );
}
